//! Flushing run state to disk.

use crate::checkpoint::{CheckpointStore, RunState};
use crate::models::{PathsConfig, Result};
use crate::output::ResultSink;
use tracing::{debug, warn};

/// Writes the checkpoint and the result table together.
///
/// The checkpoint is written first. If the table write fails afterwards the
/// next flush regenerates it from the checkpoint.
#[derive(Debug, Clone)]
pub struct Persister {
    store: CheckpointStore,
    sink: ResultSink,
}

impl Persister {
    pub fn new(store: CheckpointStore, sink: ResultSink) -> Self {
        Self { store, sink }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(
            CheckpointStore::new(paths.checkpoint_file()),
            ResultSink::new(paths.results_file()),
        )
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    /// Persist the state and mark it clean.
    pub fn flush(&self, state: &mut RunState) -> Result<()> {
        state.touch();
        self.store.save(state.checkpoint())?;
        self.sink.flush(state.results())?;
        state.mark_clean();
        debug!(cursor = state.cursor(), "Run state flushed");
        Ok(())
    }

    /// Persist the state, logging instead of returning failures.
    pub fn flush_logged(&self, state: &mut RunState) -> bool {
        match self.flush(state) {
            Ok(()) => true,
            Err(e) => {
                warn!(cursor = state.cursor(), error = %e, "Intermediate save failed");
                false
            }
        }
    }
}
