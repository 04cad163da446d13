//! End-to-end runs with scripted collaborators.

use async_trait::async_trait;
use chanscope::analysis::{Classifier, Fetcher, OpenRouterClassifier, Scorer};
use chanscope::checkpoint::{BackupManager, Checkpoint, LivePaths};
use chanscope::models::{
    ChanscopeError, Label, PathsConfig, Post, AUX_DIR, CHECKPOINT_FILE, RESULTS_FILE,
};
use chanscope::output::ResultSink;
use chanscope::pipeline::{aux_job_list, reanalysis_persister, reanalysis_runner, RunnerSettings};
use chanscope::{
    CheckpointStore, ExitGuard, JobList, JobRunner, Persister, Result, RunOutcome, RunState,
    RunSummary,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Returns one post per channel; `broken*` channels fail, `hang` cancels the
/// run and never returns.
struct ScriptedFetcher {
    calls: Mutex<Vec<String>>,
    cancel: CancellationToken,
}

impl ScriptedFetcher {
    fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            cancel,
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, job_id: &str) -> Result<Vec<Post>> {
        self.calls.lock().unwrap().push(job_id.to_string());
        if job_id.starts_with("broken") {
            return Err(ChanscopeError::InvalidInput("channel unavailable".into()));
        }
        if job_id == "hang" {
            self.cancel.cancel();
            return std::future::pending().await;
        }
        Ok(vec![Post {
            date: Utc::now(),
            text: format!("post from {job_id}"),
            kind: Default::default(),
            views: 100,
            reactions_positive: 1,
            reactions_negative: 0,
            comments: 1,
            forwards: 1,
        }])
    }
}

struct ScriptedClassifier;

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, summary: &str) -> Result<String> {
        let expert = summary.contains("expert");
        Ok(format!(
            "Verdict: {{\"expert\": {expert}, \"competencies\": [\"analytics\"]}}"
        ))
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    fn persister(&self) -> Persister {
        Persister::new(
            CheckpointStore::new(self.results_dir().join(CHECKPOINT_FILE)),
            ResultSink::new(self.results_dir().join(RESULTS_FILE)),
        )
    }

    fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.results_dir().join(CHECKPOINT_FILE))
    }

    fn sink(&self) -> ResultSink {
        ResultSink::new(self.results_dir().join(RESULTS_FILE))
    }

    fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            save_every: 10,
            delay: Duration::ZERO,
            max_jobs_per_run: 1000,
            job_timeout: Duration::from_secs(5),
            aux_dir: Some(self.results_dir().join(AUX_DIR)),
            label_keys: vec!["expert".into()],
            tag_keys: vec!["competencies".into()],
            show_progress: false,
        }
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(
            self.dir.path().join("backups"),
            LivePaths {
                results_file: self.results_dir().join(RESULTS_FILE),
                checkpoint_file: self.results_dir().join(CHECKPOINT_FILE),
                aux_dir: self.results_dir().join(AUX_DIR),
            },
        )
    }

    /// One process lifetime: load, run, drop.
    async fn run(
        &self,
        jobs: &JobList,
        settings: RunnerSettings,
        cancel: CancellationToken,
    ) -> (RunSummary, Arc<ScriptedFetcher>) {
        let fetcher = ScriptedFetcher::new(cancel.clone());
        let runner = JobRunner::new(
            fetcher.clone(),
            Arc::new(ScriptedClassifier),
            Scorer::new(5, false),
            settings,
        );
        let summary = drive(&runner, jobs, self.persister(), &cancel).await;
        (summary, fetcher)
    }
}

async fn drive(
    runner: &JobRunner,
    jobs: &JobList,
    persister: Persister,
    cancel: &CancellationToken,
) -> RunSummary {
    let state = RunState::resume_or_start(persister.store().load(), jobs.len());
    let mut guard = ExitGuard::new(state, persister);
    runner.run(jobs, &mut guard, cancel).await.unwrap()
}

/// Records the on-disk checkpoint cursor each time a job starts.
struct CursorWatchingFetcher {
    store: CheckpointStore,
    seen: Mutex<Vec<(String, Option<usize>)>>,
}

impl CursorWatchingFetcher {
    fn cursor_at(&self, job_id: &str) -> Option<usize> {
        let seen = self.seen.lock().unwrap();
        let (_, cursor) = seen.iter().find(|(id, _)| id == job_id).unwrap();
        *cursor
    }
}

#[async_trait]
impl Fetcher for CursorWatchingFetcher {
    async fn fetch(&self, job_id: &str) -> Result<Vec<Post>> {
        let cursor = self.store.read()?.map(|c| c.cursor);
        self.seen.lock().unwrap().push((job_id.to_string(), cursor));
        Ok(Vec::new())
    }
}

fn jobs(items: &[&str]) -> JobList {
    items.iter().map(|s| s.to_string()).collect()
}

fn channel_jobs(n: usize) -> JobList {
    (0..n).map(|i| format!("https://t.me/channel_{i}")).collect()
}

fn channel_jobs_with_blanks(n: usize, blanks: &[usize]) -> JobList {
    (0..n)
        .map(|i| {
            if blanks.contains(&i) {
                String::new()
            } else {
                format!("https://t.me/channel_{i}")
            }
        })
        .collect()
}

#[tokio::test]
async fn test_blank_entries_are_skipped_and_failures_recorded() {
    let ws = Workspace::new();
    let list = jobs(&["https://t.me/alpha", "", "https://t.me/broken_beta"]);

    let (summary, fetcher) = ws.run(&list, ws.settings(), CancellationToken::new()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.cursor, 3);
    assert_eq!((summary.processed, summary.skipped, summary.failed), (2, 1, 1));
    assert_eq!(fetcher.calls(), vec!["alpha", "broken_beta"]);

    let rows = ws.sink().read().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].job_id, "alpha");
    assert_eq!(rows[0].label, Label::No.as_str());
    assert_eq!(rows[0].detail, "analytics");
    assert_eq!(rows[1].label, "unknown");
    assert_eq!(rows[1].detail, "error: Invalid input: channel unavailable");

    assert!(!ws.store().exists(), "completed run clears the checkpoint");
    assert!(ws.results_dir().join(AUX_DIR).join("alpha/posts.jsonl").is_file());
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_repeating_jobs() {
    let ws = Workspace::new();
    let list = jobs(&[
        "https://t.me/a",
        "https://t.me/b",
        "https://t.me/hang",
        "https://t.me/c",
    ]);

    let (first, fetcher) = ws.run(&list, ws.settings(), CancellationToken::new()).await;
    assert_eq!(first.outcome, RunOutcome::Interrupted);
    assert_eq!(first.cursor, 2, "in-flight job is not recorded");
    assert_eq!(fetcher.calls(), vec!["a", "b", "hang"]);

    let stored = ws.store().read().unwrap().unwrap();
    assert_eq!(stored.cursor, 2);
    assert_eq!(stored.results.len(), 2);
    assert_eq!(ws.sink().read().unwrap().len(), 2);

    // The channel no longer hangs on the second attempt.
    let list = jobs(&["https://t.me/a", "https://t.me/b", "@hang_fixed", "https://t.me/c"]);
    let (second, fetcher) = ws.run(&list, ws.settings(), CancellationToken::new()).await;
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.started_at_cursor, 2);
    assert_eq!(fetcher.calls(), vec!["hang_fixed", "c"]);

    let ids: Vec<String> = ws.sink().read().unwrap().into_iter().map(|r| r.job_id).collect();
    assert_eq!(ids, vec!["a", "b", "hang_fixed", "c"]);
}

#[tokio::test]
async fn test_cap_stops_run_and_keeps_checkpoint() {
    let ws = Workspace::new();
    let list = channel_jobs(1500);
    let mut settings = ws.settings();
    settings.save_every = 250;
    settings.aux_dir = None;

    let (first, _) = ws.run(&list, settings.clone(), CancellationToken::new()).await;
    assert_eq!(first.outcome, RunOutcome::CapReached);
    assert_eq!(first.cursor, 1000);

    let stored = ws.store().read().unwrap().unwrap();
    assert_eq!(stored.cursor, 1000);
    assert_eq!(stored.total_jobs, 1500);
    assert_eq!(ws.sink().read().unwrap().len(), 1000);

    let (second, fetcher) = ws.run(&list, settings, CancellationToken::new()).await;
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.processed, 500);
    assert_eq!(fetcher.calls().first().map(String::as_str), Some("channel_1000"));
    assert_eq!(ws.sink().read().unwrap().len(), 1500);
    assert!(!ws.store().exists());
}

#[tokio::test]
async fn test_stored_total_wins_over_shorter_job_list() {
    let ws = Workspace::new();
    let mut stored = Checkpoint::new(5);
    stored.cursor = 1;
    ws.store().save(&stored).unwrap();

    // Only three jobs remain in the file; indices 3 and 4 count as blank.
    let list = jobs(&["https://t.me/a", "https://t.me/b", "https://t.me/c"]);
    let (summary, fetcher) = ws.run(&list, ws.settings(), CancellationToken::new()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.total_jobs, 5);
    assert_eq!(summary.cursor, 5);
    assert_eq!((summary.processed, summary.skipped), (2, 2));
    assert_eq!(fetcher.calls(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_backup_restores_an_earlier_checkpoint() {
    let ws = Workspace::new();
    let list = channel_jobs(6);
    let mut settings = ws.settings();
    settings.max_jobs_per_run = 3;

    ws.run(&list, settings.clone(), CancellationToken::new()).await;
    let before = std::fs::read(ws.store().path()).unwrap();
    let report = ws.backups().create_backup(Some("halfway")).unwrap();
    assert!(report.artifacts.is_clean());

    let (finished, _) = ws.run(&list, settings.clone(), CancellationToken::new()).await;
    assert_eq!(finished.cursor, 6);
    assert!(!ws.store().exists());

    ws.backups().restore_backup("halfway").unwrap();
    assert_eq!(std::fs::read(ws.store().path()).unwrap(), before);
    assert_eq!(ws.sink().read().unwrap().len(), 3);
    assert_eq!(aux_channels(&ws.results_dir().join(AUX_DIR)).len(), 3);

    let (resumed, fetcher) = ws.run(&list, settings, CancellationToken::new()).await;
    assert_eq!(resumed.started_at_cursor, 3);
    assert_eq!(fetcher.calls().len(), 3);
}

fn aux_channels(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_progress_is_saved_every_save_every_processed_jobs() {
    for (blanks, first_save) in [(vec![], 10), (vec![3, 7], 12)] {
        let ws = Workspace::new();
        let list = channel_jobs_with_blanks(25, &blanks);
        let mut settings = ws.settings();
        settings.aux_dir = None;

        let fetcher = Arc::new(CursorWatchingFetcher {
            store: ws.store(),
            seen: Mutex::new(Vec::new()),
        });
        let runner = JobRunner::new(
            fetcher.clone(),
            Arc::new(ScriptedClassifier),
            Scorer::new(5, false),
            settings,
        );
        let cancel = CancellationToken::new();
        let summary = drive(&runner, &list, ws.persister(), &cancel).await;
        assert_eq!(summary.processed, 25 - blanks.len());

        // Blanks advance the cursor but do not count toward the interval.
        let job = |i: usize| format!("channel_{i}");
        assert_eq!(fetcher.cursor_at(&job(first_save - 1)), None, "blanks {blanks:?}");
        assert_eq!(fetcher.cursor_at(&job(first_save)), Some(first_save));
        assert_eq!(fetcher.cursor_at(&job(first_save + 9)), Some(first_save));
        assert_eq!(fetcher.cursor_at(&job(first_save + 10)), Some(first_save + 10));
    }
}

#[tokio::test]
async fn test_missing_api_key_fails_each_job_without_stopping() {
    let ws = Workspace::new();
    let list = jobs(&["https://t.me/alpha", "https://t.me/beta"]);
    let runner = JobRunner::new(
        ScriptedFetcher::new(CancellationToken::new()),
        Arc::new(OpenRouterClassifier::without_key()),
        Scorer::new(5, false),
        ws.settings(),
    );

    let summary = drive(&runner, &list, ws.persister(), &CancellationToken::new()).await;
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!((summary.processed, summary.failed), (2, 2));

    let rows = ws.sink().read().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.label, "unknown");
        assert_eq!(row.detail, "error: Classifier API error: missing API key");
    }
}

#[tokio::test]
async fn test_reanalysis_reads_aux_tree_into_separate_table() {
    let ws = Workspace::new();
    let list = jobs(&["https://t.me/beta", "", "https://t.me/alpha"]);
    let (first, _) = ws.run(&list, ws.settings(), CancellationToken::new()).await;
    assert_eq!(first.outcome, RunOutcome::Completed);
    let main_table = std::fs::read(ws.sink().path()).unwrap();

    let aux_dir = ws.results_dir().join(AUX_DIR);
    std::fs::create_dir_all(aux_dir.join("gamma")).unwrap();

    let paths = PathsConfig {
        results_dir: ws.results_dir(),
        ..PathsConfig::default()
    };
    let reanalysis = aux_job_list(&aux_dir).unwrap();
    assert_eq!(reanalysis.len(), 3);

    let runner = reanalysis_runner(
        &aux_dir,
        Arc::new(ScriptedClassifier),
        Scorer::new(5, false),
        ws.settings(),
    );
    let persister = reanalysis_persister(&paths);
    let summary = drive(&runner, &reanalysis, persister.clone(), &CancellationToken::new()).await;
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!((summary.processed, summary.failed), (3, 1));

    let rows = persister.sink().read().unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
    assert_eq!(rows[0].detail, "analytics");
    assert!(rows[2].detail.starts_with("error: "));

    assert_eq!(std::fs::read(ws.sink().path()).unwrap(), main_table);
    assert!(!persister.store().exists());
}
