//! chanscope CLI - resumable Telegram channel classification.

use anyhow::{bail, Context, Result};
use chanscope::analysis::{ArchiveFetcher, OpenRouterClassifier, Scorer};
use chanscope::checkpoint::{BackupManager, LivePaths};
use chanscope::output::{format_duration, ResultSink, ResultStats, StatusReport};
use chanscope::pipeline::{
    aux_job_list, install_signal_handler, reanalysis_persister, reanalysis_runner, RunnerSettings,
};
use chanscope::{
    CheckpointStore, Config, ExitGuard, JobList, JobRunner, Persister, RunOutcome, RunState,
    RunSummary,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "chanscope")]
#[command(version)]
#[command(about = "Resumable batch classification of Telegram channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "chanscope.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the job list, resuming from the checkpoint if one exists
    Run {
        /// Job list to use instead of `paths.jobs`
        #[arg(short, long)]
        jobs: Option<PathBuf>,
    },

    /// Show progress of the current run
    Status,

    /// Re-classify every channel folder in the aux tree without fetching
    Reanalyze,

    /// Snapshot results, checkpoint and channel folders
    Backup {
        /// Backup name (default: backup_<timestamp>)
        name: Option<String>,
    },

    /// Restore a named backup over the live state
    Restore { name: String },

    /// List backups, newest first
    ListBackups,

    /// Delete old backups
    Cleanup {
        /// Maximum age in days (default: backup.retention_days)
        #[arg(short, long)]
        days: Option<u64>,
    },

    /// Delete the checkpoint so the next run starts over
    Reset {
        #[arg(long)]
        confirm: bool,
    },

    /// Label distribution and top tags from the result table
    Stats {
        /// Number of tags to show
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::load(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn backup_manager(config: &Config) -> BackupManager {
    BackupManager::new(
        config.paths.backups_dir(),
        LivePaths::from_config(&config.paths),
    )
}

fn print_example_config() {
    let example = r#"# chanscope configuration file

[paths]
jobs = "files/channels.csv"
results_dir = "results"
# backups_dir = "results/backups"
# aux_dir = "results/channels"

[jobs]
# Reference column by index or header name; default is the third column,
# else the first header mentioning link/channel/url/t.me.
# column = 2
# column = "link"

[runner]
save_every = 10
delay_ms = 1500
max_jobs_per_run = 1000
job_timeout_secs = 600

[fetch]
archive_dir = "exports"
# start = "2024-01-01T00:00:00Z"
# end = "2024-12-31T23:59:59Z"
only_text = false
top_posts = 5

[classifier]
# API key (can also use OPENROUTER_API_KEY env var)
# api_key = "${OPENROUTER_API_KEY}"
base_url = "https://openrouter.ai/api/v1"
model = "deepseek/deepseek-chat"
max_tokens = 1000
temperature = 0.7
timeout_secs = 30
max_retries = 3
# system_prompt = "prompts/classifier.md"

[backup]
retention_days = 7
"#;
    println!("{example}");
}

/// Build the classifier; a missing API key fails each job instead of the run.
fn build_classifier(config: &Config) -> Result<OpenRouterClassifier> {
    let api_key = match config.resolve_api_key() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(error = %e, "Classifier has no API key");
            None
        }
    };
    Ok(OpenRouterClassifier::from_config(
        &config.classifier,
        api_key.as_deref(),
    )?)
}

fn print_summary(summary: &RunSummary, results: &Path) {
    println!("\n=== Run {:?} ===", summary.outcome);
    println!("Progress:    {}/{}", summary.cursor, summary.total_jobs);
    println!("Processed:   {}", summary.processed);
    println!("Skipped:     {}", summary.skipped);
    println!("Failed:      {}", summary.failed);
    println!("Runtime:     {:.1}s", summary.elapsed.as_secs_f64());
    println!("Results:     {results:?}");

    match summary.outcome {
        RunOutcome::Completed => println!("All jobs processed."),
        RunOutcome::CapReached => println!(
            "Per-run limit reached at job {}. Run again to continue.",
            summary.cursor
        ),
        RunOutcome::Interrupted => println!(
            "Interrupted. Progress saved at job {}/{}; run again to resume.",
            summary.cursor, summary.total_jobs
        ),
    }
}

async fn run(config: Config, jobs_override: Option<PathBuf>) -> Result<()> {
    let jobs_path = jobs_override.unwrap_or_else(|| config.paths.jobs.clone());
    let jobs = JobList::load(&jobs_path, config.jobs.column.as_ref())?;

    let classifier = build_classifier(&config)?;
    let fetcher = ArchiveFetcher::from_config(&config.fetch);

    let persister = Persister::from_paths(&config.paths);
    let state = RunState::resume_or_start(persister.store().load(), jobs.len());
    let mut guard = ExitGuard::new(state, persister);

    let cancel = CancellationToken::new();
    let signals = install_signal_handler(cancel.clone());

    let runner = JobRunner::new(
        Arc::new(fetcher),
        Arc::new(classifier),
        Scorer::from_config(&config.fetch),
        RunnerSettings::from_config(&config),
    );
    let result = runner.run(&jobs, &mut guard, &cancel).await;

    // Stop the signal listener before reporting.
    cancel.cancel();
    let _ = signals.await;
    let summary = result?;

    print_summary(&summary, &config.paths.results_file());
    Ok(())
}

async fn reanalyze(config: Config) -> Result<()> {
    let aux_dir = config.paths.aux_dir();
    let jobs = aux_job_list(&aux_dir)?;

    let persister = reanalysis_persister(&config.paths);
    let state = RunState::resume_or_start(persister.store().load(), jobs.len());
    let mut guard = ExitGuard::new(state, persister);

    let cancel = CancellationToken::new();
    let signals = install_signal_handler(cancel.clone());

    let runner = reanalysis_runner(
        &aux_dir,
        Arc::new(build_classifier(&config)?),
        Scorer::from_config(&config.fetch),
        RunnerSettings::from_config(&config),
    );
    let result = runner.run(&jobs, &mut guard, &cancel).await;

    cancel.cancel();
    let _ = signals.await;
    let summary = result?;

    print_summary(&summary, &config.paths.reanalysis_results_file());
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = CheckpointStore::new(config.paths.checkpoint_file());
    let Some(checkpoint) = store.read().context("Failed to read checkpoint")? else {
        println!("No run in progress (no checkpoint at {:?}).", store.path());
        return Ok(());
    };

    let report = StatusReport::from_checkpoint(&checkpoint, chrono::Utc::now());
    println!("=== Run in progress ===");
    println!(
        "Progress:    {}/{} ({:.1}%), {} results",
        report.cursor, report.total_jobs, report.percent, report.results
    );
    println!("Next job:    {}", report.next_job());
    println!("Started:     {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Last save:   {}", report.last_saved_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Elapsed:     {}", format_duration(report.elapsed));
    if let (Some(avg), Some(eta)) = (report.avg_per_job, report.eta) {
        println!("Per job:     {}", format_duration(avg));
        println!("Remaining:   {}", format_duration(eta));
    }
    Ok(())
}

fn stats(config: &Config, top: usize) -> Result<()> {
    let sink = ResultSink::new(config.paths.results_file());
    if !sink.path().exists() {
        bail!("No result table at {:?}", sink.path());
    }
    let rows = sink.read()?;
    let stats = ResultStats::from_rows(&rows, top);

    println!("=== Results ===");
    println!("Channels:    {}", stats.total);
    println!("Expert:      {} ({:.1}%)", stats.yes, stats.percent(stats.yes));
    println!("Not expert:  {} ({:.1}%)", stats.no, stats.percent(stats.no));
    println!("Unknown:     {} ({:.1}%)", stats.unknown, stats.percent(stats.unknown));
    if !stats.top_tags.is_empty() {
        println!("\nTop tags:");
        for (i, (tag, count)) in stats.top_tags.iter().enumerate() {
            println!("  {:>2}. {tag}: {count}", i + 1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => print_example_config(),

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Jobs: {:?}", config.paths.jobs);
            info!("  Results: {:?}", config.paths.results_dir);
            info!("  Model: {}", config.classifier.model);
            info!(
                "  Save every {} jobs, at most {} per run",
                config.runner.save_every, config.runner.max_jobs_per_run
            );
        }

        Commands::Run { jobs } => run(load_config(&cli.config)?, jobs).await?,

        Commands::Status => status(&load_config(&cli.config)?)?,

        Commands::Reanalyze => reanalyze(load_config(&cli.config)?).await?,

        Commands::Backup { name } => {
            let config = load_config(&cli.config)?;
            let report = backup_manager(&config).create_backup(name.as_deref())?;
            println!("Backup created: {:?}", report.path);
            for artifact in &report.artifacts.copied {
                println!("  copied   {}", artifact.description());
            }
            for artifact in &report.artifacts.missing {
                println!("  missing  {}", artifact.description());
            }
            for (artifact, error) in &report.artifacts.failed {
                println!("  FAILED   {}: {error}", artifact.description());
            }
        }

        Commands::Restore { name } => {
            let config = load_config(&cli.config)?;
            let report = backup_manager(&config).restore_backup(&name)?;
            for artifact in &report.copied {
                println!("Restored {}", artifact.description());
            }
            for (artifact, error) in &report.failed {
                println!("Failed to restore {}: {error}", artifact.description());
            }
            if !report.is_clean() {
                bail!("Restore of {name:?} was incomplete");
            }
        }

        Commands::ListBackups => {
            let config = load_config(&cli.config)?;
            let backups = backup_manager(&config).list_backups()?;
            if backups.is_empty() {
                println!("No backups in {:?}", config.paths.backups_dir());
            }
            for backup in backups {
                let flag = |present: bool, label: &'static str| if present { label } else { "-" };
                println!(
                    "{:<32} {}  [{} {} {}]",
                    backup.name,
                    backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                    flag(backup.contents.results, "results"),
                    flag(backup.contents.checkpoint, "checkpoint"),
                    flag(backup.contents.aux_tree, "channels"),
                );
            }
        }

        Commands::Cleanup { days } => {
            let config = load_config(&cli.config)?;
            let days = days.unwrap_or(config.backup.retention_days);
            let report = backup_manager(&config).cleanup(days)?;
            println!(
                "Deleted {} backup(s) older than {days} day(s)",
                report.deleted.len()
            );
            for (name, error) in &report.failed {
                println!("  failed to delete {name}: {error}");
            }
        }

        Commands::Reset { confirm } => {
            if !confirm {
                bail!("Refusing to reset without --confirm");
            }
            let config = load_config(&cli.config)?;
            CheckpointStore::new(config.paths.checkpoint_file()).clear()?;
            println!("Checkpoint removed; the next run starts from the first job.");
        }

        Commands::Stats { top } => stats(&load_config(&cli.config)?, top)?,
    }

    Ok(())
}
