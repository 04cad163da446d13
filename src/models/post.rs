//! Channel post records as returned by a fetcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a post carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Text,
    Photo,
    Video,
    Document,
    Voice,
    VideoNote,
    Sticker,
    Poll,
}

/// One channel post with its engagement counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub date: DateTime<Utc>,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub kind: ContentKind,

    #[serde(default)]
    pub views: u64,

    /// Reactions with a positive emoji
    #[serde(default)]
    pub reactions_positive: u64,

    /// All other reactions
    #[serde(default)]
    pub reactions_negative: u64,

    #[serde(default)]
    pub comments: u64,

    #[serde(default)]
    pub forwards: u64,
}

impl Post {
    pub fn reactions(&self) -> u64 {
        self.reactions_positive + self.reactions_negative
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
