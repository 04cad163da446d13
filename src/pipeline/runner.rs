//! Sequential, resumable job runner.
//!
//! Jobs run strictly in list order starting at the checkpoint cursor. Each
//! job is fetched, scored and classified; whatever happens becomes a result
//! row, so a single bad channel never stops the run. Progress is flushed every
//! `save_every` processed jobs and once more when the run ends.

use crate::analysis::{encode_posts, parse_verdict, posts_path, Classifier, Fetcher, Scorer};
use crate::checkpoint::write_atomic;
use crate::models::{Config, JobResult, Outcome, Post, Result};
use crate::pipeline::{ExitGuard, JobList};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Intermediate flush after this many processed jobs
    pub save_every: usize,
    /// Pause between processed jobs
    pub delay: Duration,
    /// Cursor advances allowed in one run, blanks included
    pub max_jobs_per_run: usize,
    /// Bound on each fetch and each classification
    pub job_timeout: Duration,
    /// Where fetched posts are mirrored, per channel
    pub aux_dir: Option<PathBuf>,
    pub label_keys: Vec<String>,
    pub tag_keys: Vec<String>,
    pub show_progress: bool,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            save_every: config.runner.save_every.max(1),
            delay: Duration::from_millis(config.runner.delay_ms),
            max_jobs_per_run: config.runner.max_jobs_per_run,
            job_timeout: Duration::from_secs(config.runner.job_timeout_secs),
            aux_dir: Some(config.paths.aux_dir()),
            label_keys: config.classifier.label_keys.clone(),
            tag_keys: config.classifier.tag_keys.clone(),
            show_progress: true,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every job visited; checkpoint cleared
    Completed,
    /// Per-run cap hit; checkpoint kept for the next run
    CapReached,
    /// Cancelled; checkpoint kept
    Interrupted,
}

/// Counters for one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Cursor when this run started
    pub started_at_cursor: usize,
    pub cursor: usize,
    pub total_jobs: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Drives fetch, score and classify over the job list.
pub struct JobRunner {
    fetcher: Arc<dyn Fetcher>,
    classifier: Arc<dyn Classifier>,
    scorer: Scorer,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        classifier: Arc<dyn Classifier>,
        scorer: Scorer,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            scorer,
            settings,
        }
    }

    /// Run from the guard's cursor until done, capped or cancelled.
    ///
    /// The final flush error is returned; the checkpoint is cleared only when
    /// every job has been visited and that flush succeeded.
    pub async fn run(
        &self,
        jobs: &JobList,
        guard: &mut ExitGuard,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let started_at_cursor = guard.state().cursor();
        let total = guard.state().total_jobs();
        let cap = self.settings.max_jobs_per_run;

        info!(
            cursor = started_at_cursor,
            total,
            cap,
            "Starting run"
        );

        let pb = self.progress_bar(total, started_at_cursor);
        let mut advanced = 0usize;
        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;
        let mut since_save = 0usize;

        let outcome = loop {
            if guard.state().is_complete() {
                break RunOutcome::Completed;
            }
            if advanced >= cap {
                break RunOutcome::CapReached;
            }
            if cancel.is_cancelled() {
                break RunOutcome::Interrupted;
            }

            let index = guard.state().cursor();
            let Some(reference) = jobs.get(index) else {
                debug!(index, "Skipping blank job");
                guard.state_mut().skip();
                advanced += 1;
                skipped += 1;
                pb.inc(1);
                continue;
            };

            pb.set_message(reference.to_string());
            let Some(result) = self.process(reference, cancel).await else {
                info!(index, "Job abandoned on shutdown; it will be retried");
                break RunOutcome::Interrupted;
            };

            if result.outcome.is_failure() {
                failed += 1;
            }
            debug!(
                index,
                job_id = %result.job_id,
                label = %result.label(),
                "Job finished"
            );
            guard.state_mut().record(result);
            advanced += 1;
            processed += 1;
            since_save += 1;
            pb.inc(1);

            if since_save >= self.settings.save_every {
                guard.flush_logged();
                since_save = 0;
            }

            let more = !guard.state().is_complete() && advanced < cap;
            if more && !self.settings.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break RunOutcome::Interrupted,
                    _ = tokio::time::sleep(self.settings.delay) => {}
                }
            }
        };

        pb.finish_and_clear();

        guard.flush()?;
        if outcome == RunOutcome::Completed {
            guard.persister().store().clear()?;
        }

        let summary = RunSummary {
            outcome,
            started_at_cursor,
            cursor: guard.state().cursor(),
            total_jobs: total,
            processed,
            skipped,
            failed,
            elapsed: start.elapsed(),
        };
        info!(
            outcome = ?summary.outcome,
            cursor = summary.cursor,
            total = summary.total_jobs,
            processed,
            skipped,
            failed,
            elapsed_secs = summary.elapsed.as_secs(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Process one job; `None` when cancelled before it finished.
    async fn process(&self, reference: &str, cancel: &CancellationToken) -> Option<JobResult> {
        let job_id = crate::models::derive_job_id(reference);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.analyze(&job_id) => Some(JobResult::new(reference, outcome)),
        }
    }

    async fn analyze(&self, job_id: &str) -> Outcome {
        let timeout = self.settings.job_timeout;

        let posts = match tokio::time::timeout(timeout, self.fetcher.fetch(job_id)).await {
            Ok(Ok(posts)) => posts,
            Ok(Err(e)) => {
                warn!(job_id, error = %e, "Fetch failed");
                return Outcome::FetchFailed {
                    message: e.to_string(),
                };
            }
            Err(_) => {
                warn!(job_id, timeout_secs = timeout.as_secs(), "Fetch timed out");
                return Outcome::FetchFailed {
                    message: format!("fetch timed out after {timeout:?}"),
                };
            }
        };

        self.mirror_posts(job_id, &posts);

        let Some(summary) = self.scorer.summarize(&posts) else {
            return Outcome::NoData;
        };

        match tokio::time::timeout(timeout, self.classifier.classify(&summary)).await {
            Ok(Ok(raw)) => parse_verdict(&raw, &self.settings.label_keys, &self.settings.tag_keys),
            Ok(Err(e)) => {
                warn!(job_id, error = %e, "Classification failed");
                Outcome::ClassifyFailed {
                    message: e.to_string(),
                }
            }
            Err(_) => {
                warn!(job_id, timeout_secs = timeout.as_secs(), "Classification timed out");
                Outcome::ClassifyFailed {
                    message: format!("classification timed out after {timeout:?}"),
                }
            }
        }
    }

    /// Copy fetched posts into the aux tree. Failures are logged only.
    fn mirror_posts(&self, job_id: &str, posts: &[Post]) {
        let Some(aux_dir) = &self.settings.aux_dir else {
            return;
        };
        if posts.is_empty() {
            return;
        }

        let path = posts_path(aux_dir, job_id);
        let written = encode_posts(posts).and_then(|bytes| {
            write_atomic(&path, &bytes)
                .map_err(|e| crate::models::ChanscopeError::io("writing aux posts", e))
        });
        if let Err(e) = written {
            warn!(job_id, path = %path.display(), error = %e, "Failed to mirror posts");
        }
    }

    fn progress_bar(&self, total: usize, position: usize) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb.set_position(position as u64);
        pb
    }
}
