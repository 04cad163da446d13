//! Job list loading.
//!
//! The job list is a delimited table with a header row. One column holds the
//! channel references; every data row is one job, blank cells included, so
//! job indices stay aligned with the file across runs.

use crate::models::{ChanscopeError, JobColumn, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Delimiters tried in order.
const DELIMITERS: [u8; 3] = [b';', b',', b'\t'];

/// Header fragments that mark a reference column.
const COLUMN_HINTS: [&str; 4] = ["link", "channel", "url", "t.me"];

/// Ordered job references read from a table.
#[derive(Debug, Clone)]
pub struct JobList {
    path: PathBuf,
    delimiter: u8,
    column: String,
    entries: Vec<String>,
}

impl JobList {
    /// Load the job list, choosing the reference column as configured.
    pub fn load(path: &Path, column: Option<&JobColumn>) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChanscopeError::JobListNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(ChanscopeError::io(format!("reading {}", path.display()), e)),
        };

        let mut list = Self::parse(&content, column)?;
        list.path = path.to_path_buf();
        info!(
            path = %path.display(),
            column = %list.column,
            jobs = list.len(),
            blank = list.blank_count(),
            "Job list loaded"
        );
        Ok(list)
    }

    /// Parse job list content.
    pub fn parse(content: &str, column: Option<&JobColumn>) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let delimiter = detect_delimiter(content);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ChanscopeError::csv("reading job list header", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let index = select_column(&headers, column)?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ChanscopeError::csv("reading job list row", e))?;
            entries.push(record.get(index).map(str::trim).unwrap_or_default().to_string());
        }

        let shown = (delimiter as char).escape_default().to_string();
        debug!(delimiter = %shown, column = index, "Job list parsed");
        Ok(Self {
            path: PathBuf::new(),
            delimiter,
            column: headers[index].clone(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Header of the reference column.
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference at `index`, or `None` when the entry is blank or past the end.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries
            .get(index)
            .map(String::as_str)
            .filter(|s| !is_blank(s))
    }

    pub fn blank_count(&self) -> usize {
        self.entries.iter().filter(|s| is_blank(s)).count()
    }
}

impl FromIterator<String> for JobList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            path: PathBuf::new(),
            delimiter: DELIMITERS[0],
            column: String::new(),
            entries: iter.into_iter().collect(),
        }
    }
}

fn is_blank(entry: &str) -> bool {
    let entry = entry.trim();
    entry.is_empty() || entry.eq_ignore_ascii_case("nan")
}

/// First delimiter that splits the header into more than one column.
fn detect_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    DELIMITERS
        .into_iter()
        .find(|d| header.as_bytes().contains(d))
        .unwrap_or(DELIMITERS[0])
}

fn select_column(headers: &[String], column: Option<&JobColumn>) -> Result<usize> {
    let not_found = || ChanscopeError::JobColumnNotFound {
        available: headers.to_vec(),
    };

    match column {
        Some(JobColumn::Index(index)) if *index < headers.len() => Ok(*index),
        Some(JobColumn::Index(_)) => Err(not_found()),
        Some(JobColumn::Name(name)) => headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(not_found),
        None if headers.len() >= 3 => Ok(2),
        None => headers
            .iter()
            .position(|h| {
                let h = h.to_lowercase();
                COLUMN_HINTS.iter().any(|hint| h.contains(hint))
            })
            .ok_or_else(not_found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_third_column_is_default() {
        let content = "rank;title;link\n1;Alpha;https://t.me/alpha\n2;Beta;\n3;Gamma;@gamma\n";
        let jobs = JobList::parse(content, None).unwrap();

        assert_eq!(jobs.column(), "link");
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs.get(0), Some("https://t.me/alpha"));
        assert_eq!(jobs.get(1), None);
        assert_eq!(jobs.get(2), Some("@gamma"));
        assert_eq!(jobs.get(3), None);
        assert_eq!(jobs.blank_count(), 1);
    }

    #[test]
    fn test_detects_comma_and_tab_delimiters() {
        let comma = JobList::parse("name,url\nA,https://t.me/a\n", None).unwrap();
        assert_eq!(comma.delimiter(), b',');
        assert_eq!(comma.get(0), Some("https://t.me/a"));

        let tab = JobList::parse("Channel\tsubs\nhttps://t.me/b\t10\n", None).unwrap();
        assert_eq!(tab.delimiter(), b'\t');
        assert_eq!(tab.get(0), Some("https://t.me/b"));
    }

    #[test]
    fn test_explicit_column_overrides_heuristics() {
        let content = "a;b;c;d\n1;x;y;https://t.me/z\n";
        let by_index = JobList::parse(content, Some(&JobColumn::Index(3))).unwrap();
        assert_eq!(by_index.get(0), Some("https://t.me/z"));

        let by_name = JobList::parse(content, Some(&JobColumn::Name("B".into()))).unwrap();
        assert_eq!(by_name.get(0), Some("x"));
    }

    #[test]
    fn test_unresolvable_column_is_fatal() {
        let err = JobList::parse("name;subs\nA;1\n", None).unwrap_err();
        match err {
            ChanscopeError::JobColumnNotFound { available } => {
                assert_eq!(available, vec!["name".to_string(), "subs".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(JobList::parse("a;b;c\n", Some(&JobColumn::Index(7))).is_err());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(matches!(
            JobList::load(&path, None),
            Err(ChanscopeError::JobListNotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_load_strips_bom_and_records_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.csv");
        std::fs::write(&path, "\u{feff}link\nhttps://t.me/a\nnan\n").unwrap();

        let jobs = JobList::load(&path, None).unwrap();
        assert_eq!(jobs.path(), path.as_path());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs.get(1), None);
    }
}
