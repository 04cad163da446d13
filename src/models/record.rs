//! Result records produced by a run.
//!
//! A job's outcome is kept as a closed enum for as long as it lives in memory
//! or in the checkpoint. It is flattened to the four-column row
//! (`job_id`, `source_reference`, `label`, `detail`) only when the result
//! table is written.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Job id used when a reference does not name a channel.
pub const UNKNOWN_JOB_ID: &str = "unknown";

/// Classifier verdict as written to the result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "true")]
    Yes,
    #[serde(rename = "false")]
    No,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "true",
            Self::No => "false",
            Self::Unknown => "unknown",
        }
    }

    /// Normalize a loosely typed verdict (`true`, `"True"`, `"false"`, ...).
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(true) => Self::Yes,
            serde_json::Value::Bool(false) => Self::No,
            serde_json::Value::String(s) => Self::from_text(s),
            _ => Self::Unknown,
        }
    }

    pub fn from_text(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "true" => Self::Yes,
            "false" => Self::No,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Classifier returned a parseable verdict
    Classified { label: Label, tags: Vec<String> },
    /// Fetch succeeded but produced nothing worth classifying
    NoData,
    /// Fetch failed or timed out
    FetchFailed { message: String },
    /// Classifier call failed or timed out
    ClassifyFailed { message: String },
    /// Classifier answered, but without a readable verdict
    Unparsed { raw: String },
}

impl Outcome {
    pub fn label(&self) -> Label {
        match self {
            Self::Classified { label, .. } => *label,
            _ => Label::Unknown,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Classified { tags, .. } => tags.join(", "),
            Self::NoData => "no data".to_string(),
            Self::FetchFailed { message } | Self::ClassifyFailed { message } => {
                format!("error: {message}")
            }
            Self::Unparsed { raw } => raw.clone(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::ClassifyFailed { .. })
    }
}

/// One row of the result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Channel name derived from the reference, or `"unknown"`
    pub job_id: String,
    /// The job input, verbatim
    pub source_reference: String,
    pub outcome: Outcome,
}

impl JobResult {
    pub fn new(source_reference: &str, outcome: Outcome) -> Self {
        Self {
            job_id: derive_job_id(source_reference),
            source_reference: source_reference.to_string(),
            outcome,
        }
    }

    pub fn label(&self) -> Label {
        self.outcome.label()
    }

    pub fn detail(&self) -> String {
        self.outcome.detail()
    }
}

/// Extract the channel name from a `t.me/<name>` link or an `@name` handle.
///
/// Never returns an empty string.
pub fn derive_job_id(reference: &str) -> String {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let re = LINK.get_or_init(|| {
        Regex::new(r"(?:https?://)?t\.me/([^/?#\s]+)").expect("static regex")
    });

    let reference = reference.trim();
    let candidate = match re.captures(reference) {
        Some(caps) => caps[1].to_string(),
        None if reference.starts_with('@') => reference.to_string(),
        None => String::new(),
    };

    let name = candidate.replace('@', "");
    if name.is_empty() {
        UNKNOWN_JOB_ID.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_job_id() {
        assert_eq!(derive_job_id("https://t.me/sellerx"), "sellerx");
        assert_eq!(derive_job_id("t.me/sellerx/123"), "sellerx");
        assert_eq!(derive_job_id("http://t.me/@handle"), "handle");
        assert_eq!(derive_job_id("@handle"), "handle");
        assert_eq!(derive_job_id("https://example.com/x"), UNKNOWN_JOB_ID);
        assert_eq!(derive_job_id("t.me/"), UNKNOWN_JOB_ID);
    }

    #[test]
    fn test_outcome_flattening() {
        let classified = Outcome::Classified {
            label: Label::Yes,
            tags: vec!["marketing".into(), "sales".into()],
        };
        assert_eq!(classified.label(), Label::Yes);
        assert_eq!(classified.detail(), "marketing, sales");

        assert_eq!(Outcome::NoData.label(), Label::Unknown);
        assert_eq!(Outcome::NoData.detail(), "no data");

        let failed = Outcome::FetchFailed {
            message: "boom".into(),
        };
        assert_eq!(failed.detail(), "error: boom");
        assert!(failed.is_failure());

        let raw = Outcome::Unparsed {
            raw: "not json".into(),
        };
        assert_eq!(raw.label(), Label::Unknown);
        assert_eq!(raw.detail(), "not json");
        assert!(!raw.is_failure());
    }

    #[test]
    fn test_label_normalization() {
        assert_eq!(Label::from_json(&serde_json::json!(true)), Label::Yes);
        assert_eq!(Label::from_json(&serde_json::json!("False")), Label::No);
        assert_eq!(Label::from_json(&serde_json::json!("maybe")), Label::Unknown);
        assert_eq!(Label::from_json(&serde_json::json!(1)), Label::Unknown);
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(Outcome::FetchFailed {
            message: "x".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "fetch_failed");
        let label = serde_json::to_value(Label::No).unwrap();
        assert_eq!(label, "false");
    }
}
