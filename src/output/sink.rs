//! Result table writer.
//!
//! The whole result set is rewritten on every flush. The new table is
//! serialized into a temp file, the previous table is copied to
//! `<target>.backup`, and the temp file is renamed over the target.

use crate::checkpoint::AtomicFile;
use crate::models::{ChanscopeError, JobResult, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Column delimiter. Details are free text full of commas.
pub const DELIMITER: u8 = b';';

/// Fixed header of the result table.
pub const HEADER: [&str; 4] = ["job_id", "source_reference", "label", "detail"];

/// One row of the result table as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub job_id: String,
    pub source_reference: String,
    pub label: String,
    pub detail: String,
}

/// Durable, atomically replaced result table.
#[derive(Debug, Clone)]
pub struct ResultSink {
    path: PathBuf,
    backup_path: PathBuf,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(".backup");
        Self {
            path,
            backup_path: PathBuf::from(backup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Rewrite the table with `results`.
    pub fn flush(&self, results: &[JobResult]) -> Result<()> {
        let mut file = AtomicFile::create(&self.path)
            .map_err(|e| ChanscopeError::io("creating temp result file", e))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(DELIMITER)
                .from_writer(&mut file);

            writer
                .write_record(HEADER)
                .map_err(|e| ChanscopeError::csv("writing result header", e))?;

            for result in results {
                let detail = result.detail();
                writer
                    .write_record([
                        result.job_id.as_str(),
                        result.source_reference.as_str(),
                        result.label().as_str(),
                        detail.as_str(),
                    ])
                    .map_err(|e| ChanscopeError::csv("writing result row", e))?;
            }

            writer
                .flush()
                .map_err(|e| ChanscopeError::io("flushing result rows", e))?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                warn!(
                    path = %self.backup_path.display(),
                    error = %e,
                    "Failed to rotate result backup"
                );
            }
        }

        file.commit()
            .map_err(|e| ChanscopeError::io("replacing result file", e))?;

        debug!(rows = results.len(), path = %self.path.display(), "Results flushed");
        Ok(())
    }

    /// Read the table back.
    pub fn read(&self) -> Result<Vec<ResultRow>> {
        let file = File::open(&self.path).map_err(|e| ChanscopeError::io("opening result file", e))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .from_reader(file);

        reader
            .deserialize()
            .map(|row| row.map_err(|e| ChanscopeError::csv("reading result row", e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, Outcome};
    use tempfile::TempDir;

    fn results() -> Vec<JobResult> {
        vec![
            JobResult::new(
                "https://t.me/alpha",
                Outcome::Classified {
                    label: Label::Yes,
                    tags: vec!["marketing".into(), "sales; b2b".into()],
                },
            ),
            JobResult::new(
                "https://t.me/beta",
                Outcome::FetchFailed {
                    message: "channel is private".into(),
                },
            ),
        ]
    }

    #[test]
    fn test_flush_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("results.csv"));
        sink.flush(&results()).unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        assert!(content.starts_with("job_id;source_reference;label;detail\n"));

        let rows = sink.read().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "true");
        assert_eq!(rows[0].detail, "marketing, sales; b2b");
        assert_eq!(rows[1].job_id, "beta");
        assert_eq!(rows[1].detail, "error: channel is private");
    }

    #[test]
    fn test_empty_flush_still_writes_header() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("results.csv"));
        sink.flush(&[]).unwrap();
        assert_eq!(
            fs::read_to_string(sink.path()).unwrap(),
            "job_id;source_reference;label;detail\n"
        );
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("results.csv"));
        sink.flush(&results()).unwrap();
        let first = fs::read(sink.path()).unwrap();
        sink.flush(&results()).unwrap();
        assert_eq!(first, fs::read(sink.path()).unwrap());
    }

    #[test]
    fn test_flush_rotates_previous_version() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("results.csv"));
        let all = results();

        sink.flush(&all[..1]).unwrap();
        assert!(!sink.backup_path().exists());
        let previous = fs::read(sink.path()).unwrap();

        sink.flush(&all).unwrap();
        assert_eq!(fs::read(sink.backup_path()).unwrap(), previous);
        assert_eq!(sink.read().unwrap().len(), 2);
        assert!(sink
            .backup_path()
            .to_string_lossy()
            .ends_with("results.csv.backup"));
    }
}
