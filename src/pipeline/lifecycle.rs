//! Shutdown handling.
//!
//! Signals only cancel a token; the runner notices between jobs (or while a
//! job is in flight) and flushes. [`ExitGuard`] covers every other way out of
//! a run: if it is dropped with unsaved state, it flushes on the way down.

use crate::checkpoint::{Persister, RunState};
use crate::models::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Cancel `cancel` on SIGINT or SIGTERM.
pub fn install_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            name = shutdown_signal() => {
                warn!(signal = name, "Shutdown signal received, saving progress");
                cancel.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

/// Owns the run state and flushes it if dropped while dirty.
pub struct ExitGuard {
    state: RunState,
    persister: Persister,
}

impl ExitGuard {
    pub fn new(state: RunState, persister: Persister) -> Self {
        Self { state, persister }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    /// Flush now, returning any error.
    pub fn flush(&mut self) -> Result<()> {
        self.persister.flush(&mut self.state)
    }

    /// Flush now, logging any error.
    pub fn flush_logged(&mut self) -> bool {
        self.persister.flush_logged(&mut self.state)
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if !self.state.is_dirty() {
            return;
        }
        if let Err(e) = self.persister.flush(&mut self.state) {
            error!(cursor = self.state.cursor(), error = %e, "Exit flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, Persister};
    use crate::models::{JobResult, Outcome};
    use crate::output::ResultSink;
    use std::time::Duration;
    use tempfile::TempDir;

    fn persister(dir: &TempDir) -> Persister {
        Persister::new(
            CheckpointStore::new(dir.path().join("cp.json")),
            ResultSink::new(dir.path().join("results.csv")),
        )
    }

    #[test]
    fn test_drop_flushes_dirty_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut guard = ExitGuard::new(RunState::resume_or_start(None, 3), persister(&dir));
            guard
                .state_mut()
                .record(JobResult::new("https://t.me/a", Outcome::NoData));
        }
        let stored = persister(&dir).store().read().unwrap().unwrap();
        assert_eq!(stored.cursor, 1);
        assert_eq!(stored.results.len(), 1);
    }

    #[test]
    fn test_drop_after_flush_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut guard = ExitGuard::new(RunState::resume_or_start(None, 1), persister(&dir));
        guard.flush().unwrap();
        guard.persister().store().clear().unwrap();
        drop(guard);
        assert!(!dir.path().join("cp.json").exists());
    }

    #[test]
    fn test_drop_during_panic_still_flushes() {
        let dir = TempDir::new().unwrap();
        let p = persister(&dir);
        let outcome = std::panic::catch_unwind(move || {
            let mut guard = ExitGuard::new(RunState::resume_or_start(None, 2), p);
            guard.state_mut().skip();
            panic!("boom");
        });
        assert!(outcome.is_err());
        assert_eq!(persister(&dir).store().read().unwrap().unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn test_handler_exits_when_token_cancelled() {
        let cancel = CancellationToken::new();
        let handle = install_signal_handler(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
