//! Result table output and reports.
//!
//! Provides:
//! - `ResultSink`: atomic rewrite of the delimited result table
//! - `ResultStats`: label and tag statistics over a written table
//! - `StatusReport`: progress and ETA from a stored checkpoint

mod sink;
mod stats;
mod status;

pub use sink::*;
pub use stats::*;
pub use status::*;
