//! Chat completions client for the classifier.

mod openrouter;
mod rate_limiter;

pub use openrouter::*;
pub use rate_limiter::*;
