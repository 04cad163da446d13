//! Configuration models for chanscope.
//!
//! Every tunable of a run lives here and is loaded from a TOML file. All
//! sections and fields are optional; omitted values fall back to the defaults
//! below, so an absent config file is equivalent to an empty one.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// File name of the checkpoint inside the results directory.
pub const CHECKPOINT_FILE: &str = "analysis_checkpoint.json";
/// File name of the result table inside the results directory.
pub const RESULTS_FILE: &str = "analysis_results.csv";
/// Directory name of the per-channel auxiliary tree inside the results directory.
pub const AUX_DIR: &str = "channels";
/// Result table written by a re-analysis of the aux tree.
pub const REANALYSIS_RESULTS_FILE: &str = "reanalysis_results.csv";
/// Checkpoint of a re-analysis of the aux tree.
pub const REANALYSIS_CHECKPOINT_FILE: &str = "reanalysis_checkpoint.json";

/// Top-level configuration for chanscope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input and output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Job list parsing
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Sequential runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Post fetching and scoring
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Classifier endpoint
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Backup retention
    #[serde(default)]
    pub backup: BackupConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Delimited file listing one channel per row
    #[serde(default = "default_jobs_file")]
    pub jobs: PathBuf,

    /// Directory holding the checkpoint, the result table and the aux tree
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Directory holding named backups (default: `<results_dir>/backups`)
    #[serde(default)]
    pub backups_dir: Option<PathBuf>,

    /// Per-channel post mirror (default: `<results_dir>/channels`)
    #[serde(default)]
    pub aux_dir: Option<PathBuf>,
}

fn default_jobs_file() -> PathBuf {
    PathBuf::from("files/channels.csv")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs_file(),
            results_dir: default_results_dir(),
            backups_dir: None,
            aux_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn checkpoint_file(&self) -> PathBuf {
        self.results_dir.join(CHECKPOINT_FILE)
    }

    pub fn results_file(&self) -> PathBuf {
        self.results_dir.join(RESULTS_FILE)
    }

    pub fn reanalysis_checkpoint_file(&self) -> PathBuf {
        self.results_dir.join(REANALYSIS_CHECKPOINT_FILE)
    }

    pub fn reanalysis_results_file(&self) -> PathBuf {
        self.results_dir.join(REANALYSIS_RESULTS_FILE)
    }

    pub fn aux_dir(&self) -> PathBuf {
        self.aux_dir
            .clone()
            .unwrap_or_else(|| self.results_dir.join(AUX_DIR))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.backups_dir
            .clone()
            .unwrap_or_else(|| self.results_dir.join("backups"))
    }
}

/// Column selector for the job list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobColumn {
    /// Zero-based column position
    Index(usize),
    /// Exact header name
    Name(String),
}

/// Job list parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Explicit column holding channel references; heuristics apply when unset
    #[serde(default)]
    pub column: Option<JobColumn>,
}

/// Sequential runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Intermediate flush every N processed jobs
    #[serde(default = "default_save_every")]
    pub save_every: usize,

    /// Pause between jobs in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Safety valve: cursor advances allowed in a single run
    #[serde(default = "default_max_jobs_per_run")]
    pub max_jobs_per_run: usize,

    /// Upper bound on fetch and classify, each, per job
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_save_every() -> usize {
    10
}

fn default_delay_ms() -> u64 {
    1500
}

fn default_max_jobs_per_run() -> usize {
    1000
}

fn default_job_timeout_secs() -> u64 {
    600
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            save_every: default_save_every(),
            delay_ms: default_delay_ms(),
            max_jobs_per_run: default_max_jobs_per_run(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// Post fetching and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Directory of exported channels, laid out as `<dir>/<channel>/posts.jsonl`
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Inclusive lower bound on post dates
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,

    /// Inclusive upper bound on post dates
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,

    /// Score text posts only
    #[serde(default)]
    pub only_text: bool,

    /// Number of top posts forwarded to the classifier
    #[serde(default = "default_top_posts")]
    pub top_posts: usize,
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_top_posts() -> usize {
    5
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            start: None,
            end: None,
            only_text: false,
            top_posts: default_top_posts(),
        }
    }
}

/// OpenRouter-compatible classifier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// API key; `${VAR}` placeholders are expanded
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// HTTP timeout per request
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// System prompt file; an unreadable file means no system prompt
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,

    /// JSON keys accepted for the verdict, first match wins
    #[serde(default = "default_label_keys")]
    pub label_keys: Vec<String>,

    /// JSON keys accepted for the tag list, first match wins
    #[serde(default = "default_tag_keys")]
    pub tag_keys: Vec<String>,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "deepseek/deepseek-chat".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_label_keys() -> Vec<String> {
    vec!["expert".into(), "эксперт".into(), "label".into()]
}

fn default_tag_keys() -> Vec<String> {
    vec!["competencies".into(), "компетенции".into(), "tags".into()]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            system_prompt: None,
            label_keys: default_label_keys(),
            tag_keys: default_tag_keys(),
        }
    }
}

/// Backup retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Default age cutoff for `cleanup`
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_retention_days() -> u64 {
    7
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load configuration, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file absent, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Resolve the classifier API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.classifier.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.classifier.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.classifier.api_key_env.clone(),
        })
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.save_every == 0 {
            return Err(ConfigError::Invalid(
                "runner.save_every must be at least 1".into(),
            ));
        }
        if self.runner.max_jobs_per_run == 0 {
            return Err(ConfigError::Invalid(
                "runner.max_jobs_per_run must be at least 1".into(),
            ));
        }
        if self.fetch.top_posts == 0 {
            return Err(ConfigError::Invalid(
                "fetch.top_posts must be at least 1".into(),
            ));
        }
        if let (Some(start), Some(end)) = (self.fetch.start, self.fetch.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "fetch.start ({start}) is after fetch.end ({end})"
                )));
            }
        }
        if self.classifier.model.trim().is_empty() {
            return Err(ConfigError::Invalid("classifier.model is empty".into()));
        }
        if self.classifier.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "classifier.max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left as-is.
pub fn expand_env_vars(s: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or classifier.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
