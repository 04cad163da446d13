//! Adaptive rate limiter for the classifier endpoint.
//!
//! Only one model is called, one request at a time, so a single state behind
//! a mutex is enough. The state is fed from `x-ratelimit-*` response headers
//! and from 429 responses.

use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound for the 429 backoff.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Longest wait accepted from a server-provided header.
const MAX_HEADER_WAIT_SECS: f64 = 300.0;

/// Convert header seconds to a wait, clamped to [`MAX_HEADER_WAIT_SECS`].
///
/// Non-finite values are ignored.
pub(crate) fn header_wait(secs: f64) -> Option<Duration> {
    if !secs.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_HEADER_WAIT_SECS)).ok()
}

/// Rate limit state reported by the endpoint.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// Remaining requests in current interval
    pub remaining_requests: Option<u32>,
    /// Remaining tokens in current interval
    pub remaining_tokens: Option<u32>,
    pub reset_requests_at: Option<Instant>,
    pub reset_tokens_at: Option<Instant>,
    /// Consecutive 429 errors (for backoff)
    pub consecutive_429s: u32,
    pub backoff_until: Option<Instant>,
}

impl RateLimitState {
    /// Get time to wait before proceeding.
    pub fn wait_time(&self, now: Instant) -> Duration {
        let mut max_wait = Duration::ZERO;

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            max_wait = max_wait.max(until - now);
        }
        if self.remaining_requests == Some(0) {
            if let Some(reset) = self.reset_requests_at.filter(|&t| t > now) {
                max_wait = max_wait.max(reset - now);
            }
        }
        if self.remaining_tokens == Some(0) {
            if let Some(reset) = self.reset_tokens_at.filter(|&t| t > now) {
                max_wait = max_wait.max(reset - now);
            }
        }

        max_wait
    }

    /// Record a 429 and extend the backoff.
    ///
    /// A server-provided `retry-after` wins over the exponential schedule.
    pub fn record_429(&mut self, retry_after: Option<Duration>) {
        self.consecutive_429s += 1;
        let exponential = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        let backoff = retry_after
            .unwrap_or_else(|| Duration::from_secs_f64(exponential))
            .min(Duration::from_secs_f64(MAX_HEADER_WAIT_SECS));
        self.backoff_until = Instant::now().checked_add(backoff);
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff.as_secs_f64(),
            "Rate limited (429), backing off"
        );
    }

    pub fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
    }

    /// Update state from response headers.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        let now = Instant::now();
        let header = |key: &str| headers.get(key).and_then(|v| v.to_str().ok());

        if let Some(v) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = v.parse().ok();
        }
        if let Some(v) = header("x-ratelimit-remaining-tokens") {
            self.remaining_tokens = v.parse().ok();
        }
        let reset_at = |key: &str| {
            header(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(header_wait)
                .and_then(|wait| now.checked_add(wait))
        };

        if let Some(at) = reset_at("x-ratelimit-reset-requests") {
            self.reset_requests_at = Some(at);
        }
        if let Some(at) = reset_at("x-ratelimit-reset-tokens") {
            self.reset_tokens_at = Some(at);
        }
    }
}

/// Shared rate limiter for the classifier client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RateLimitState> {
        // State is plain counters; a panic while holding the lock leaves it usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait if necessary before the next request.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self) -> Duration {
        let wait_time = self.state().wait_time(Instant::now());

        if wait_time > Duration::ZERO {
            debug!(wait_ms = wait_time.as_millis() as u64, "Waiting for rate limit");
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Record a response.
    pub fn record_response(&self, status: u16, headers: &HeaderMap, retry_after: Option<Duration>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state();
        state.update_from_headers(headers);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(retry_after);
        } else if status < 400 {
            state.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
}
