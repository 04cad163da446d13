//! Named snapshots of persisted run state.
//!
//! A backup is a directory `<backups>/<name>/` holding copies of the result
//! table, the checkpoint and the per-channel aux tree, each optional. Backups
//! never share files with the live state, so deleting or restoring one leaves
//! the live checkpoint intact until an artifact is explicitly replaced.

use crate::checkpoint::atomic::copy_atomic;
use crate::models::{ChanscopeError, PathsConfig, Result, AUX_DIR, CHECKPOINT_FILE, RESULTS_FILE};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Live locations a backup snapshots and restores into.
#[derive(Debug, Clone)]
pub struct LivePaths {
    pub results_file: PathBuf,
    pub checkpoint_file: PathBuf,
    pub aux_dir: PathBuf,
}

impl LivePaths {
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            results_file: paths.results_file(),
            checkpoint_file: paths.checkpoint_file(),
            aux_dir: paths.aux_dir(),
        }
    }

    fn live_path(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::Results => &self.results_file,
            Artifact::Checkpoint => &self.checkpoint_file,
            Artifact::AuxTree => &self.aux_dir,
        }
    }
}

/// One piece of persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Results,
    Checkpoint,
    AuxTree,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::Results, Artifact::Checkpoint, Artifact::AuxTree];

    /// Entry name inside a backup directory.
    pub fn entry_name(&self) -> &'static str {
        match self {
            Self::Results => RESULTS_FILE,
            Self::Checkpoint => CHECKPOINT_FILE,
            Self::AuxTree => AUX_DIR,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Checkpoint => "checkpoint",
            Self::AuxTree => "channel folders",
        }
    }
}

/// Per-artifact outcome of a backup or restore.
#[derive(Debug, Clone, Default)]
pub struct ArtifactReport {
    pub copied: Vec<Artifact>,
    /// Not present at the source; nothing to copy
    pub missing: Vec<Artifact>,
    pub failed: Vec<(Artifact, String)>,
}

impl ArtifactReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of `create_backup`.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub name: String,
    pub path: PathBuf,
    pub artifacts: ArtifactReport,
}

/// Which artifacts a backup holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupContents {
    pub results: bool,
    pub checkpoint: bool,
    pub aux_tree: bool,
}

/// Listing entry for one backup.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub contents: BackupContents,
}

/// Outcome of `cleanup`.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Creates, restores, lists and prunes backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    live: LivePaths,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, live: LivePaths) -> Self {
        Self {
            dir: dir.into(),
            live,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot the live state into `<backups>/<name>`.
    ///
    /// The default name is `backup_<YYYYmmdd_HHMMSS>`. Failures on individual
    /// artifacts are reported in the returned report.
    pub fn create_backup(&self, name: Option<&str>) -> Result<BackupReport> {
        let name = match name {
            Some(name) => validate_name(name)?.to_string(),
            None => format!("backup_{}", Local::now().format("%Y%m%d_%H%M%S")),
        };
        let path = self.dir.join(&name);
        fs::create_dir_all(&path).map_err(|e| ChanscopeError::io("creating backup dir", e))?;

        let mut artifacts = ArtifactReport::default();
        for artifact in Artifact::ALL {
            let source = self.live.live_path(artifact);
            let target = path.join(artifact.entry_name());
            record_copy(&mut artifacts, artifact, source, &target);
        }

        info!(
            name = %name,
            copied = artifacts.copied.len(),
            failed = artifacts.failed.len(),
            "Backup created"
        );
        Ok(BackupReport {
            name,
            path,
            artifacts,
        })
    }

    /// Copy a backup's artifacts back over the live state.
    ///
    /// Each artifact is replaced independently; files are swapped in
    /// atomically and the aux tree is replaced wholesale, never merged.
    pub fn restore_backup(&self, name: &str) -> Result<ArtifactReport> {
        let path = self.dir.join(validate_name(name)?);
        if !path.is_dir() {
            return Err(ChanscopeError::BackupNotFound(name.to_string()));
        }

        let mut artifacts = ArtifactReport::default();
        for artifact in Artifact::ALL {
            let source = path.join(artifact.entry_name());
            let target = self.live.live_path(artifact);
            record_copy(&mut artifacts, artifact, &source, target);
        }

        info!(
            name = %name,
            restored = artifacts.copied.len(),
            failed = artifacts.failed.len(),
            "Backup restored"
        );
        Ok(artifacts)
    }

    /// List backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChanscopeError::io("reading backups dir", e)),
        };

        let mut backups: Vec<(SystemTime, BackupInfo)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let contents = BackupContents {
                results: path.join(Artifact::Results.entry_name()).is_file(),
                checkpoint: path.join(Artifact::Checkpoint.entry_name()).is_file(),
                aux_tree: path.join(Artifact::AuxTree.entry_name()).is_dir(),
            };
            backups.push((
                modified,
                BackupInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path,
                    created_at: DateTime::<Local>::from(modified),
                    contents,
                },
            ));
        }

        backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(backups.into_iter().map(|(_, info)| info).collect())
    }

    /// Delete backups last modified more than `max_age_days` ago.
    pub fn cleanup(&self, max_age_days: u64) -> Result<CleanupReport> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(max_age_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut report = CleanupReport::default();
        for backup in self.list_backups()? {
            if backup.created_at >= DateTime::<Local>::from(cutoff) {
                continue;
            }
            match fs::remove_dir_all(&backup.path) {
                Ok(()) => {
                    debug!(name = %backup.name, "Deleted old backup");
                    report.deleted.push(backup.name);
                }
                Err(e) => {
                    warn!(name = %backup.name, error = %e, "Failed to delete backup");
                    report.failed.push((backup.name, e.to_string()));
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            max_age_days, "Backup cleanup finished"
        );
        Ok(report)
    }
}

/// Backup names are a single path component.
fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(ChanscopeError::InvalidBackupName(name.to_string()));
    }
    Ok(trimmed)
}

fn record_copy(report: &mut ArtifactReport, artifact: Artifact, source: &Path, target: &Path) {
    let outcome = match artifact {
        Artifact::AuxTree if source.is_dir() => replace_tree(source, target),
        Artifact::Results | Artifact::Checkpoint if source.is_file() => {
            copy_atomic(source, target).map(|_| ())
        }
        _ => {
            report.missing.push(artifact);
            return;
        }
    };

    match outcome {
        Ok(()) => report.copied.push(artifact),
        Err(e) => {
            warn!(
                artifact = artifact.description(),
                source = %source.display(),
                error = %e,
                "Failed to copy artifact"
            );
            report.failed.push((artifact, e.to_string()));
        }
    }
}

/// Replace the directory `target` with a copy of `source`.
///
/// The copy is staged beside the target and swapped in once complete, so a
/// failed copy leaves the previous tree in place.
fn replace_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!(".{}.{}.staging", AUX_DIR, uuid::Uuid::new_v4()));
    if let Err(e) = copy_tree(source, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    fs::rename(&staging, target)
}

fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
