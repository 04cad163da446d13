//! Progress report for an in-flight run.

use crate::checkpoint::Checkpoint;
use chrono::{DateTime, Duration, Utc};

/// Snapshot of a stored checkpoint, with timing estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub cursor: usize,
    pub total_jobs: usize,
    pub results: usize,
    pub percent: f64,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: DateTime<Utc>,
    /// Wall time since the run first started, pauses included
    pub elapsed: Duration,
    pub avg_per_job: Option<Duration>,
    pub eta: Option<Duration>,
}

impl StatusReport {
    pub fn from_checkpoint(checkpoint: &Checkpoint, now: DateTime<Utc>) -> Self {
        let elapsed = (now - checkpoint.started_at).max(Duration::zero());
        let avg_per_job = (checkpoint.cursor > 0)
            .then(|| elapsed / i32::try_from(checkpoint.cursor).unwrap_or(i32::MAX));
        let remaining = i32::try_from(checkpoint.remaining()).unwrap_or(i32::MAX);
        let eta = avg_per_job.and_then(|avg| avg.checked_mul(remaining));

        Self {
            cursor: checkpoint.cursor,
            total_jobs: checkpoint.total_jobs,
            results: checkpoint.results.len(),
            percent: checkpoint.progress_percent(),
            started_at: checkpoint.started_at,
            last_saved_at: checkpoint.last_saved_at,
            elapsed,
            avg_per_job,
            eta,
        }
    }

    /// One-based index of the next job.
    pub fn next_job(&self) -> usize {
        self.cursor + 1
    }
}

/// Render a duration as `HH:MM:SS`, with a day prefix when needed.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let (days, rest) = (total / 86_400, total % 86_400);
    let (h, m, s) = (rest / 3600, rest % 3600 / 60, rest % 60);
    if days > 0 {
        format!("{days}d {h:02}:{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}
