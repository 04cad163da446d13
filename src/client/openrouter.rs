//! OpenRouter-compatible chat completions client.
//!
//! Transient failures (network errors, timeouts, 429 and 5xx responses) are
//! retried with exponential backoff; a 429 `retry-after` header is honored
//! through the shared [`RateLimiter`]. Authentication and unknown-model
//! errors fail immediately.

use crate::client::rate_limiter::header_wait;
use crate::client::RateLimiter;
use crate::models::{ChanscopeError, ClassifierApiError, ClassifierConfig, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration: Duration,
}

/// Chat completions client bound to one model.
pub struct OpenRouterClient {
    client: reqwest::Client,
    headers: HeaderMap,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    max_retries: u32,
    rate_limiter: Arc<RateLimiter>,
}

impl OpenRouterClient {
    /// Build a client from the classifier section of the config.
    pub fn from_config(config: &ClassifierConfig, api_key: &str) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ChanscopeError::Network)?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ChanscopeError::InvalidInput("API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("chanscope"));

        Ok(Self {
            client,
            headers,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
            max_retries: config.max_retries.max(1),
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Complete a chat request, retrying transient failures.
    pub async fn complete(&self, messages: &[Message]) -> Result<CompletionResponse> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut last_error: Option<ChanscopeError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;
            self.rate_limiter.wait_if_needed().await;

            let response = match self
                .client
                .post(&self.url)
                .headers(self.headers.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        ChanscopeError::Timeout(self.timeout)
                    } else {
                        ChanscopeError::Network(e)
                    });
                    if !is_last {
                        let backoff = backoff_for(attempt);
                        debug!(
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            self.rate_limiter
                .record_response(status, response.headers(), retry_after);

            // The limiter holds the backoff; the next iteration waits on it.
            if status == 429 {
                last_error = Some(ChanscopeError::RateLimited {
                    retry_after_secs: retry_after.map(|d| d.as_secs_f64()).unwrap_or(1.0),
                });
                continue;
            }

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                let error = match status {
                    401 => ClassifierApiError::AuthenticationFailed,
                    404 => ClassifierApiError::ModelNotFound(self.model.clone()),
                    _ => ClassifierApiError::ApiError { status, message },
                };
                last_error = Some(error.into());

                if status == 401 || status == 404 {
                    break;
                }
                if !is_last {
                    tokio::time::sleep(backoff_for(attempt)).await;
                }
                continue;
            }

            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| ChanscopeError::ParseError(format!("Failed to parse response: {e}")))?;

            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or(ClassifierApiError::EmptyResponse)?;
            let usage = body.usage.unwrap_or_default();

            debug!(
                model = %self.model,
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion received"
            );

            return Ok(CompletionResponse {
                content,
                model: body.model.unwrap_or_else(|| self.model.clone()),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                duration: start.elapsed(),
            });
        }

        Err(match last_error {
            Some(e @ ChanscopeError::ClassifierApi(_)) => e,
            Some(e) => ClassifierApiError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: e.to_string(),
            }
            .into(),
            None => ClassifierApiError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            }
            .into(),
        })
    }

    /// Complete with an optional system prompt and a user prompt.
    pub async fn complete_with_system(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.trim().is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.push(Message::user(user_prompt));
        self.complete(&messages).await
    }
}

fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.min(6)))
}

/// Parse a `retry-after` header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(header_wait)
}
