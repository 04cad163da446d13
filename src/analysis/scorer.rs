//! Engagement scoring and summary text.

use crate::models::{ContentKind, FetchConfig, Post};
use std::fmt::Write as _;

/// Engagement rate in percent: (reactions + comments + forwards) / views · 100.
pub fn engagement_rate(post: &Post) -> f64 {
    if post.views == 0 {
        return 0.0;
    }
    let engaged = post.reactions() + post.comments + post.forwards;
    engaged as f64 / post.views as f64 * 100.0
}

/// Virality score, normalized by the log of views. Zero for unseen posts.
pub fn virality(post: &Post) -> f64 {
    if post.views == 0 {
        return 0.0;
    }
    let balance = post.reactions_positive as f64 - post.reactions_negative as f64;
    let raw = 5.0 * post.forwards as f64
        + 3.0 * post.comments as f64
        + 2.0 * post.reactions() as f64
        + 1.5 * engagement_rate(post)
        + 0.5 * balance;
    raw / (post.views as f64 + 1.0).ln()
}

/// Turns fetched posts into classifier input.
#[derive(Debug, Clone)]
pub struct Scorer {
    top_posts: usize,
    only_text: bool,
}

impl Scorer {
    pub fn new(top_posts: usize, only_text: bool) -> Self {
        Self {
            top_posts,
            only_text,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.top_posts, config.only_text)
    }

    /// Texts of the `top_posts` most viral posts, numbered by rank.
    ///
    /// A post without text keeps its place in the ranking and its number is
    /// skipped. `None` when none of the top posts has text.
    pub fn summarize(&self, posts: &[Post]) -> Option<String> {
        let mut ranked: Vec<(f64, &Post)> = posts
            .iter()
            .filter(|p| !self.only_text || p.kind == ContentKind::Text)
            .map(|p| (virality(p), p))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.date.cmp(&a.1.date)));

        let mut summary = String::new();
        for (i, (_, post)) in ranked.iter().take(self.top_posts).enumerate() {
            if post.has_text() {
                let _ = write!(summary, "text {}:\n{}\n\n", i + 1, post.text.trim());
            }
        }
        (!summary.is_empty()).then_some(summary)
    }
}
