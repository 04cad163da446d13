//! Per-job analysis: fetch posts, pick the most viral, classify.

mod classifier;
mod fetcher;
mod scorer;

pub use classifier::*;
pub use fetcher::*;
pub use scorer::*;
