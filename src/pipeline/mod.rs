//! Pipeline module - job list, runner, re-analysis and shutdown handling.

mod jobs;
mod lifecycle;
mod reanalyze;
mod runner;

pub use jobs::*;
pub use lifecycle::*;
pub use reanalyze::*;
pub use runner::*;
