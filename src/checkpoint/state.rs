//! Checkpoint state management for resumable runs.
//!
//! The checkpoint is the source of truth for a run: it carries the cursor and
//! every result produced so far. The result table is derived from it on each
//! flush. Checkpoints are written with write-then-rename, so a reader never
//! observes a torn file.

use crate::checkpoint::atomic::{sweep_stale_temps, write_atomic};
use crate::models::{ChanscopeError, JobResult, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Durable record of run progress.
///
/// Field names are the on-disk contract; renaming them breaks resume of
/// checkpoints written by older builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the next job to process
    pub cursor: usize,
    /// Results in job order
    pub results: Vec<JobResult>,
    /// Length of the job list when the run started
    pub total_jobs: usize,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create an empty checkpoint for a fresh run.
    pub fn new(total_jobs: usize) -> Self {
        let now = Utc::now();
        Self {
            cursor: 0,
            results: Vec::new(),
            total_jobs,
            started_at: now,
            last_saved_at: now,
        }
    }

    /// Check if every job has been visited.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total_jobs
    }

    pub fn remaining(&self) -> usize {
        self.total_jobs.saturating_sub(self.cursor)
    }

    /// Get progress percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.total_jobs == 0 {
            return 100.0;
        }
        (self.cursor as f64 / self.total_jobs as f64) * 100.0
    }

    /// Reject checkpoints whose invariants do not hold.
    fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.cursor > self.total_jobs {
            return Err(format!(
                "cursor {} exceeds total_jobs {}",
                self.cursor, self.total_jobs
            ));
        }
        if self.results.len() > self.cursor {
            return Err(format!(
                "{} results recorded for cursor {}",
                self.results.len(),
                self.cursor
            ));
        }
        if self.last_saved_at < self.started_at {
            return Err("last_saved_at precedes started_at".to_string());
        }
        Ok(())
    }
}

/// Run state threaded through the runner, the store and the exit guard.
#[derive(Debug, Clone)]
pub struct RunState {
    checkpoint: Checkpoint,
    /// Cursor at the start of this process, for resume reporting
    resumed_at: Option<usize>,
    /// In-memory changes not yet flushed
    dirty: bool,
}

impl RunState {
    /// Start fresh or resume from a loaded checkpoint.
    ///
    /// When the stored `total_jobs` differs from the current job list the
    /// stored value is kept.
    pub fn resume_or_start(loaded: Option<Checkpoint>, total_jobs: usize) -> Self {
        match loaded {
            Some(checkpoint) => {
                if checkpoint.total_jobs != total_jobs {
                    warn!(
                        stored = checkpoint.total_jobs,
                        current = total_jobs,
                        "Job list length changed since checkpoint; keeping stored count"
                    );
                }
                info!(
                    cursor = checkpoint.cursor,
                    total = checkpoint.total_jobs,
                    results = checkpoint.results.len(),
                    "Resuming from checkpoint"
                );
                Self {
                    resumed_at: Some(checkpoint.cursor),
                    checkpoint,
                    dirty: false,
                }
            }
            None => {
                info!(total = total_jobs, "Starting new run");
                Self {
                    checkpoint: Checkpoint::new(total_jobs),
                    resumed_at: None,
                    dirty: true,
                }
            }
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn cursor(&self) -> usize {
        self.checkpoint.cursor
    }

    pub fn total_jobs(&self) -> usize {
        self.checkpoint.total_jobs
    }

    pub fn results(&self) -> &[JobResult] {
        &self.checkpoint.results
    }

    pub fn resumed_at(&self) -> Option<usize> {
        self.resumed_at
    }

    pub fn is_complete(&self) -> bool {
        self.checkpoint.is_complete()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append the result for the job at the cursor and advance.
    pub fn record(&mut self, result: JobResult) {
        debug_assert!(!self.is_complete(), "record past the end of the job list");
        self.checkpoint.results.push(result);
        self.checkpoint.cursor += 1;
        self.dirty = true;
    }

    /// Advance past a blank job without a result.
    pub fn skip(&mut self) {
        debug_assert!(!self.is_complete(), "skip past the end of the job list");
        self.checkpoint.cursor += 1;
        self.dirty = true;
    }

    /// Stamp the save time; call right before persisting.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.checkpoint.last_saved_at {
            self.checkpoint.last_saved_at = now;
        }
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Loads and saves the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the checkpoint, treating an absent or unreadable file as "none".
    pub fn load(&self) -> Option<Checkpoint> {
        sweep_stale_temps(&self.path);
        match self.read() {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Checkpoint unreadable, starting fresh"
                );
                None
            }
        }
    }

    /// Read the checkpoint, reporting corruption as an error.
    pub fn read(&self) -> Result<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChanscopeError::io("reading checkpoint", e)),
        };

        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| ChanscopeError::ParseError(format!("Invalid checkpoint: {e}")))?;
        checkpoint
            .check_invariants()
            .map_err(|e| ChanscopeError::ParseError(format!("Invalid checkpoint: {e}")))?;

        Ok(Some(checkpoint))
    }

    /// Save checkpoint to disk (atomic write).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let content = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| ChanscopeError::Internal(format!("Serializing checkpoint: {e}")))?;

        write_atomic(&self.path, &content)
            .map_err(|e| ChanscopeError::io("writing checkpoint", e))?;

        debug!(cursor = checkpoint.cursor, "Checkpoint saved");
        Ok(())
    }

    /// Remove the checkpoint after a completed run.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChanscopeError::io("removing checkpoint", e)),
        }
    }
}
