use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;

const UNKNOWN_REMAINING: i64 = -1;

/// Quota bookkeeping for one remote API, shared by every transport targeting it.
///
/// Reads and writes are individually atomic; a stale read can at worst cause
/// one extra wait, never a skipped one, because the only blocking condition is
/// "remaining is zero and the reset lies in the future".
#[derive(Debug)]
pub struct RateLimitState {
    remaining: AtomicI64,
    reset_unix_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub remaining: Option<u64>,
    pub reset_unix_ms: Option<u64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            remaining: AtomicI64::new(UNKNOWN_REMAINING),
            reset_unix_ms: AtomicU64::new(0),
        }
    }
}

impl RateLimitState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `X-RateLimit-Remaining` / `X-RateLimit-Reset` when present.
    pub fn observe_headers(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset_unix_ms =
            header_u64(headers, "x-ratelimit-reset").map(|seconds| seconds.saturating_mul(1_000));
        self.record(remaining, reset_unix_ms);
    }

    pub fn record(&self, remaining: Option<u64>, reset_unix_ms: Option<u64>) {
        if let Some(remaining) = remaining {
            let value = i64::try_from(remaining).unwrap_or(i64::MAX);
            self.remaining.store(value, Ordering::SeqCst);
        }
        if let Some(reset_unix_ms) = reset_unix_ms {
            self.reset_unix_ms.store(reset_unix_ms, Ordering::SeqCst);
        }
    }

    /// Marks the quota exhausted until `until_unix_ms` so concurrent callers wait too.
    pub fn block_until(&self, until_unix_ms: u64) {
        self.reset_unix_ms.fetch_max(until_unix_ms, Ordering::SeqCst);
        self.remaining.store(0, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> Option<u64> {
        u64::try_from(self.remaining.load(Ordering::SeqCst)).ok()
    }

    pub fn reset_unix_ms(&self) -> Option<u64> {
        match self.reset_unix_ms.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }

    /// Wait required before the next call, if the quota is exhausted.
    pub fn required_wait(&self, now_unix_ms: u64) -> Option<Duration> {
        if self.remaining()? != 0 {
            return None;
        }
        let reset = self.reset_unix_ms()?;
        (reset > now_unix_ms).then(|| Duration::from_millis(reset - now_unix_ms))
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            remaining: self.remaining(),
            reset_unix_ms: self.reset_unix_ms(),
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse::<u64>().ok()
}
