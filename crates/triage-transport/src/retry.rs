use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use triage_core::{current_unix_timestamp_ms, millis_until_unix_ms};

use crate::error::FailureClass;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Retry knobs for a [`crate::ResilientTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts allowed for transient failures, first attempt included.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Wait applied when a rate-limited response carries no reset signal.
    pub default_rate_limit_wait_ms: u64,
    /// Longest single rate-limit wait the transport accepts before giving up.
    pub max_rate_limit_wait_ms: u64,
    pub max_rate_limit_waits: usize,
    /// Remaining-quota threshold below which every response logs a warning.
    pub low_quota_buffer: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
            default_rate_limit_wait_ms: 60_000,
            max_rate_limit_wait_ms: 60 * 60 * 1_000,
            max_rate_limit_waits: 5,
            low_quota_buffer: 100,
        }
    }
}

impl RetryConfig {
    pub(crate) fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.base_delay_ms = self.base_delay_ms.max(1);
        self.max_delay_ms = self.max_delay_ms.max(self.base_delay_ms);
        self
    }
}

/// Deterministic backoff for the `failures`-th consecutive transient failure (1-based).
pub fn backoff_delay(base_delay_ms: u64, max_delay_ms: u64, failures: usize) -> Duration {
    let exponent = failures.saturating_sub(1).min(16) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(max_delay_ms))
}

/// Scales `delay` into [50%, 100%] of itself, picking the point from `seed`.
/// Equal seeds give equal delays.
pub fn jittered_delay(delay: Duration, jitter_enabled: bool, seed: u64) -> Duration {
    let full_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if !jitter_enabled || full_ms <= 1 {
        return delay;
    }
    let floor_ms = full_ms / 2;
    let span_ms = full_ms - floor_ms;
    Duration::from_millis(floor_ms + seed % (span_ms + 1))
}

/// Jitter seed for one backoff of one logical call.
pub(crate) fn jitter_seed(request_id: &str, failures: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    request_id.hash(&mut hasher);
    failures.hash(&mut hasher);
    hasher.finish()
}

/// Reads an explicit reset signal: `Retry-After` (seconds or HTTP date) first,
/// then `X-RateLimit-Reset` (unix seconds).
pub fn parse_rate_limit_wait(headers: &HeaderMap, now_unix_ms: u64) -> Option<Duration> {
    if let Some(raw) = header_str(headers, "retry-after") {
        if let Ok(seconds) = raw.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        if let Ok(retry_at) = DateTime::parse_from_rfc2822(raw) {
            let retry_at_ms = retry_at.with_timezone(&Utc).timestamp_millis();
            let retry_at_ms = u64::try_from(retry_at_ms).unwrap_or(0);
            return Some(millis_until_unix_ms(retry_at_ms, now_unix_ms));
        }
    }
    let reset_unix_seconds = header_str(headers, "x-ratelimit-reset")?
        .parse::<u64>()
        .ok()?;
    Some(millis_until_unix_ms(
        reset_unix_seconds.saturating_mul(1_000),
        now_unix_ms,
    ))
}

/// Maps a non-success response onto a failure class; `None` means success.
pub fn classify_status(status: u16, headers: &HeaderMap, now_unix_ms: u64) -> Option<FailureClass> {
    if (200..300).contains(&status) {
        return None;
    }
    if status == 429 {
        return Some(match parse_rate_limit_wait(headers, now_unix_ms) {
            Some(wait) => FailureClass::RateLimited {
                retry_after: Some(wait),
            },
            None => FailureClass::Transient,
        });
    }
    if status == 403 && header_str(headers, "x-ratelimit-remaining") == Some("0") {
        return Some(FailureClass::RateLimited {
            retry_after: parse_rate_limit_wait(headers, now_unix_ms),
        });
    }
    if status == 408 || status >= 500 {
        return Some(FailureClass::Transient);
    }
    Some(FailureClass::Invalid)
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("triage-{}-{count}", current_unix_timestamp_ms())
}

pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
