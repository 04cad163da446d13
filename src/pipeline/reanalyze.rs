//! Re-classification of channels already mirrored in the aux tree.
//!
//! Every channel folder becomes a job whose posts are read back from the
//! tree instead of being fetched again. Rows go to their own result table
//! with their own checkpoint, so a re-analysis never touches the main run.

use crate::analysis::{ArchiveFetcher, Classifier, Scorer, TimeWindow};
use crate::checkpoint::{CheckpointStore, Persister};
use crate::models::{derive_job_id, ChanscopeError, PathsConfig, Result};
use crate::output::ResultSink;
use crate::pipeline::{JobList, JobRunner, RunnerSettings};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// One job per channel folder under `aux_dir`, sorted by folder name.
///
/// Folders without a posts file are kept; they end up as fetch failures.
pub fn aux_job_list(aux_dir: &Path) -> Result<JobList> {
    if !aux_dir.is_dir() {
        return Err(ChanscopeError::InvalidInput(format!(
            "no channel folders at {}",
            aux_dir.display()
        )));
    }

    let mut references = Vec::new();
    for entry in WalkDir::new(aux_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            ChanscopeError::io(
                format!("listing {}", aux_dir.display()),
                std::io::Error::other(e),
            )
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        let reference = format!("https://t.me/{name}");
        if name.starts_with('.') || derive_job_id(&reference) != name {
            debug!(folder = %name, "Skipping folder that is not a channel");
            continue;
        }
        references.push(reference);
    }

    info!(
        dir = %aux_dir.display(),
        channels = references.len(),
        "Channel folders listed"
    );
    Ok(references.into_iter().collect())
}

/// Checkpoint and result table of a re-analysis.
pub fn reanalysis_persister(paths: &PathsConfig) -> Persister {
    Persister::new(
        CheckpointStore::new(paths.reanalysis_checkpoint_file()),
        ResultSink::new(paths.reanalysis_results_file()),
    )
}

/// Runner that reads posts back from `aux_dir`.
///
/// Rows are flushed after every channel and nothing is mirrored.
pub fn reanalysis_runner(
    aux_dir: &Path,
    classifier: Arc<dyn Classifier>,
    scorer: Scorer,
    mut settings: RunnerSettings,
) -> JobRunner {
    settings.aux_dir = None;
    settings.save_every = 1;
    let fetcher = ArchiveFetcher::new(aux_dir, TimeWindow::default());
    JobRunner::new(Arc::new(fetcher), classifier, scorer, settings)
}
