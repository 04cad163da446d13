//! chanscope - resumable batch classification of Telegram channels.
//!
//! ## Architecture
//!
//! A run walks an ordered job list, one channel reference per job:
//! - **Fetch**: load the channel's posts (`analysis::Fetcher`)
//! - **Score**: rank posts by virality and build a summary (`analysis::Scorer`)
//! - **Classify**: ask a chat model for a verdict (`analysis::Classifier`)
//!
//! Every job yields exactly one result row, failures included. Progress lives
//! in a checkpoint that is flushed atomically together with the result table,
//! so an interrupted run resumes at the first unvisited job.
//!
//! ## Operations
//!
//! - `pipeline::JobRunner`: the run loop, with per-run cap and cooperative
//!   cancellation
//! - `checkpoint::BackupManager`: named snapshots of results, checkpoint and
//!   per-channel posts
//! - `output::ResultStats` / `output::StatusReport`: reporting

pub mod analysis;
pub mod checkpoint;
pub mod client;
pub mod models;
pub mod output;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{BackupManager, CheckpointStore, Persister, RunState};
pub use client::{OpenRouterClient, RateLimiter};
pub use models::{ChanscopeError, Config, JobResult, Outcome, Result};
pub use pipeline::{ExitGuard, JobList, JobRunner, RunOutcome, RunSummary};
