//! Channel classification.
//!
//! A [`Classifier`] returns the model's raw answer. [`parse_verdict`] pulls
//! the first JSON object out of that answer and maps it onto an [`Outcome`];
//! anything it cannot read is kept verbatim as `Outcome::Unparsed`.

use crate::client::OpenRouterClient;
use crate::models::{ClassifierApiError, ClassifierConfig, Label, Outcome, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

/// Something that answers a summary with a verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a summary, returning the raw model answer.
    async fn classify(&self, summary: &str) -> Result<String>;
}

/// Classifier backed by a chat completions endpoint.
///
/// Without an API key every classification fails with
/// [`ClassifierApiError::MissingApiKey`], so each job still gets a row.
pub struct OpenRouterClassifier {
    client: Option<OpenRouterClient>,
    system_prompt: String,
}

impl OpenRouterClassifier {
    pub fn new(client: OpenRouterClient, system_prompt: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            system_prompt: system_prompt.into(),
        }
    }

    /// A classifier that has no credentials.
    pub fn without_key() -> Self {
        Self {
            client: None,
            system_prompt: String::new(),
        }
    }

    /// Build from config, reading the system prompt file if one is set.
    pub fn from_config(config: &ClassifierConfig, api_key: Option<&str>) -> Result<Self> {
        let Some(api_key) = api_key else {
            warn!("No API key configured, every classification will fail");
            return Ok(Self::without_key());
        };
        let client = OpenRouterClient::from_config(config, api_key)?;
        let prompt = config
            .system_prompt
            .as_deref()
            .map(load_system_prompt)
            .unwrap_or_default();
        Ok(Self::new(client, prompt))
    }
}

#[async_trait]
impl Classifier for OpenRouterClassifier {
    async fn classify(&self, summary: &str) -> Result<String> {
        let client = self
            .client
            .as_ref()
            .ok_or(ClassifierApiError::MissingApiKey)?;
        let response = client
            .complete_with_system(&self.system_prompt, summary)
            .await?;
        Ok(response.content)
    }
}

/// Read a prompt file. A missing or unreadable file yields an empty prompt.
pub fn load_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(prompt) => prompt.trim().to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "System prompt unavailable, sending none");
            String::new()
        }
    }
}

/// Map a raw classifier answer onto an outcome.
///
/// The first key from `label_keys` present in the embedded JSON object gives
/// the label, the first present key from `tag_keys` gives the tags.
pub fn parse_verdict(raw: &str, label_keys: &[String], tag_keys: &[String]) -> Outcome {
    let unparsed = || Outcome::Unparsed {
        raw: raw.trim().to_string(),
    };

    let Some(object) = extract_json_object(raw) else {
        return unparsed();
    };

    let label = label_keys.iter().find_map(|k| object.get(k));
    let tags = tag_keys.iter().find_map(|k| object.get(k));
    if label.is_none() && tags.is_none() {
        return unparsed();
    }

    Outcome::Classified {
        label: label.map(Label::from_json).unwrap_or(Label::Unknown),
        tags: tags.map(tags_from_json).unwrap_or_default(),
    }
}

fn extract_json_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    static OBJECT: OnceLock<Regex> = OnceLock::new();
    let re = OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

    let candidate = re.find(raw)?.as_str();
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn tags_from_json(value: &Value) -> Vec<String> {
    let split = |s: &str| -> Vec<String> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };

    match value {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(s) => split(s),
                Value::Null => Vec::new(),
                other => vec![other.to_string()],
            })
            .collect(),
        Value::String(s) => split(s),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}
