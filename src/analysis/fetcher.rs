//! Post fetching.
//!
//! The runner only sees the [`Fetcher`] trait. [`ArchiveFetcher`] reads
//! exported channel posts from disk, one JSON object per line.

use crate::models::{ChanscopeError, FetchConfig, Post, Result, UNKNOWN_JOB_ID};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the per-channel posts file, in archives and in the aux tree.
pub const POSTS_FILE: &str = "posts.jsonl";

/// Inclusive date range; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *date >= s) && self.end.map_or(true, |e| *date <= e)
    }
}

/// Source of posts for a channel.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the posts of `job_id`. An empty list means "nothing to analyze".
    async fn fetch(&self, job_id: &str) -> Result<Vec<Post>>;
}

/// Reads `<archive>/<job_id>/posts.jsonl`.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    root: PathBuf,
    window: TimeWindow,
}

impl ArchiveFetcher {
    pub fn new(root: impl Into<PathBuf>, window: TimeWindow) -> Self {
        Self {
            root: root.into(),
            window,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            &config.archive_dir,
            TimeWindow {
                start: config.start,
                end: config.end,
            },
        )
    }
}

#[async_trait]
impl Fetcher for ArchiveFetcher {
    async fn fetch(&self, job_id: &str) -> Result<Vec<Post>> {
        if job_id == UNKNOWN_JOB_ID || job_id.contains(['/', '\\']) || job_id.starts_with('.') {
            return Err(ChanscopeError::InvalidInput(format!(
                "cannot resolve channel from {job_id:?}"
            )));
        }

        let path = posts_path(&self.root, job_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChanscopeError::InvalidInput(format!(
                    "no export for channel {job_id}"
                )))
            }
            Err(e) => return Err(ChanscopeError::io(format!("reading {}", path.display()), e)),
        };

        let posts: Vec<Post> = parse_posts(&content)
            .into_iter()
            .filter(|p| self.window.contains(&p.date))
            .collect();
        debug!(job_id, posts = posts.len(), "Posts loaded from archive");
        Ok(posts)
    }
}

/// Location of a channel's posts file under `root`.
pub fn posts_path(root: &Path, job_id: &str) -> PathBuf {
    root.join(job_id).join(POSTS_FILE)
}

/// Parse JSON lines, skipping blank and malformed ones.
pub fn parse_posts(content: &str) -> Vec<Post> {
    let mut skipped = 0usize;
    let posts: Vec<Post> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Post>(line) {
            Ok(post) => Some(post),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        warn!(skipped, "Skipped malformed post lines");
    }
    posts
}

/// Serialize posts as JSON lines.
pub fn encode_posts(posts: &[Post]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for post in posts {
        serde_json::to_writer(&mut out, post)
            .map_err(|e| ChanscopeError::Internal(format!("Serializing post: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}
