//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `Checkpoint` / `RunState`: cursor and accumulated results
//! - `CheckpointStore`: atomic persistence of the checkpoint
//! - `Persister`: checkpoint plus result table flush
//! - `BackupManager`: named snapshots of the persisted state
//! - `AtomicFile`: write-then-rename file replacement

mod atomic;
mod backup;
mod persist;
mod state;

pub use atomic::{copy_atomic, sweep_stale_temps, write_atomic, AtomicFile};
pub use backup::*;
pub use persist::*;
pub use state::*;
