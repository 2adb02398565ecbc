use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use triage_core::current_unix_timestamp_ms;

use crate::cancellation::CancelSignal;
use crate::error::{FailureClass, TransportError};
use crate::rate_limit::RateLimitState;
use crate::retry::{
    backoff_delay, classify_status, is_retryable_http_error, jitter_seed, jittered_delay,
    new_request_id, truncate_for_error, RetryConfig,
};

pub const RETRY_ATTEMPT_HEADER: &str = "x-triage-retry-attempt";
const REQUEST_ID_HEADER: &str = "x-triage-request-id";
const ERROR_BODY_MAX_CHARS: usize = 800;

/// One logical remote call.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    pub operation: String,
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl CallDescriptor {
    pub fn new(operation: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(operation: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(operation, Method::GET, url)
    }

    pub fn post(operation: impl Into<String>, url: impl Into<String>, body: Value) -> Self {
        Self::new(operation, Method::POST, url).with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Default)]
struct TransportMetrics {
    attempts: AtomicU64,
    backoff_sleeps: AtomicU64,
    rate_limit_waits: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportMetricsSnapshot {
    pub attempts: u64,
    pub backoff_sleeps: u64,
    pub rate_limit_waits: u64,
}

/// Retrying HTTP transport. Cheap to clone; clones share metrics and quota state.
#[derive(Debug, Clone)]
pub struct ResilientTransport {
    http: reqwest::Client,
    config: RetryConfig,
    rate_limit: Arc<RateLimitState>,
    metrics: Arc<TransportMetrics>,
}

enum AttemptFailure {
    Transient(String),
    RateLimited {
        retry_after: Option<Duration>,
        reason: String,
    },
    Invalid { status: u16, body: String },
    Client(String),
}

impl ResilientTransport {
    pub fn new(http: reqwest::Client, config: RetryConfig, rate_limit: Arc<RateLimitState>) -> Self {
        Self {
            http,
            config: config.normalized(),
            rate_limit,
            metrics: Arc::new(TransportMetrics::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitState> {
        &self.rate_limit
    }

    pub fn metrics(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            attempts: self.metrics.attempts.load(Ordering::Relaxed),
            backoff_sleeps: self.metrics.backoff_sleeps.load(Ordering::Relaxed),
            rate_limit_waits: self.metrics.rate_limit_waits.load(Ordering::Relaxed),
        }
    }

    /// Performs the call and decodes a JSON body. An empty body decodes as `null`.
    pub async fn call_json<T>(
        &self,
        call: &CallDescriptor,
        cancel: &CancelSignal,
    ) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
    {
        let response = self.call(call, cancel).await?;
        let raw = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(raw).map_err(|source| TransportError::Decode {
            operation: call.operation.clone(),
            source,
        })
    }

    /// Performs the call with retry, rate-limit and cancellation handling.
    pub async fn call(
        &self,
        call: &CallDescriptor,
        cancel: &CancelSignal,
    ) -> Result<TransportResponse, TransportError> {
        let request_id = new_request_id();
        let mut attempts = 0_usize;
        let mut transient_failures = 0_usize;
        let mut rate_limit_waits = 0_usize;
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(call));
            }
            self.wait_for_quota(call, cancel, attempts, &mut rate_limit_waits)
                .await?;

            let attempt_index = attempts;
            attempts = attempts.saturating_add(1);
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
            let failure = match self.attempt(call, &request_id, attempt_index).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            match failure {
                AttemptFailure::Invalid { status, body } => {
                    warn!(
                        operation = %call.operation,
                        status,
                        "remote call rejected; not retrying"
                    );
                    return Err(TransportError::Invalid {
                        operation: call.operation.clone(),
                        status,
                        body,
                    });
                }
                AttemptFailure::Client(reason) => return Err(TransportError::Client(reason)),
                AttemptFailure::RateLimited {
                    retry_after,
                    reason,
                } => {
                    rate_limit_waits = rate_limit_waits.saturating_add(1);
                    let wait = retry_after.unwrap_or(Duration::from_millis(
                        self.config.default_rate_limit_wait_ms,
                    ));
                    self.check_rate_limit_budget(call, attempts, rate_limit_waits, wait, &reason)?;
                    self.rate_limit
                        .block_until(current_unix_timestamp_ms().saturating_add(duration_ms(wait)));
                    self.metrics.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                    info!(
                        operation = %call.operation,
                        wait_ms = duration_ms(wait),
                        "rate limited; waiting for reset"
                    );
                    if !cancel.sleep(wait).await {
                        return Err(cancelled(call));
                    }
                }
                AttemptFailure::Transient(reason) => {
                    transient_failures = transient_failures.saturating_add(1);
                    if transient_failures >= self.config.max_attempts {
                        return Err(TransportError::Unavailable {
                            operation: call.operation.clone(),
                            attempts,
                            reason,
                        });
                    }
                    let delay = jittered_delay(
                        backoff_delay(
                            self.config.base_delay_ms,
                            self.config.max_delay_ms,
                            transient_failures,
                        ),
                        self.config.jitter,
                        jitter_seed(&request_id, transient_failures),
                    );
                    self.metrics.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        operation = %call.operation,
                        attempt = attempts,
                        delay_ms = duration_ms(delay),
                        reason = %reason,
                        "transient failure; backing off"
                    );
                    if !cancel.sleep(delay).await {
                        return Err(cancelled(call));
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        call: &CallDescriptor,
        request_id: &str,
        attempt_index: usize,
    ) -> Result<TransportResponse, AttemptFailure> {
        let mut request = self
            .http
            .request(call.method.clone(), &call.url)
            .header(RETRY_ATTEMPT_HEADER, attempt_index.to_string())
            .header(REQUEST_ID_HEADER, request_id);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(body) = call.body.as_ref() {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) if is_retryable_http_error(&error) => {
                return Err(AttemptFailure::Transient(format!(
                    "request failed: {error}"
                )));
            }
            Err(error) => {
                return Err(AttemptFailure::Client(format!(
                    "{} request could not be sent: {error}",
                    call.operation
                )));
            }
        };

        let status = response.status().as_u16();
        self.rate_limit.observe_headers(response.headers());
        self.warn_on_low_quota(call);
        let class = classify_status(status, response.headers(), current_unix_timestamp_ms());
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                return Err(AttemptFailure::Transient(format!(
                    "failed to read response body: {error}"
                )));
            }
        };

        match class {
            None => Ok(TransportResponse { status, body }),
            Some(FailureClass::Invalid) => Err(AttemptFailure::Invalid {
                status,
                body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
            }),
            Some(FailureClass::RateLimited { retry_after }) => Err(AttemptFailure::RateLimited {
                retry_after,
                reason: format!(
                    "status {status}: {}",
                    truncate_for_error(&body, ERROR_BODY_MAX_CHARS)
                ),
            }),
            Some(FailureClass::Transient) => Err(AttemptFailure::Transient(format!(
                "status {status}: {}",
                truncate_for_error(&body, ERROR_BODY_MAX_CHARS)
            ))),
        }
    }

    async fn wait_for_quota(
        &self,
        call: &CallDescriptor,
        cancel: &CancelSignal,
        attempts: usize,
        rate_limit_waits: &mut usize,
    ) -> Result<(), TransportError> {
        let Some(wait) = self.rate_limit.required_wait(current_unix_timestamp_ms()) else {
            return Ok(());
        };
        *rate_limit_waits = rate_limit_waits.saturating_add(1);
        self.check_rate_limit_budget(
            call,
            attempts,
            *rate_limit_waits,
            wait,
            "shared quota exhausted",
        )?;
        self.metrics.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        info!(
            operation = %call.operation,
            wait_ms = duration_ms(wait),
            "shared rate-limit quota exhausted; waiting for reset"
        );
        if !cancel.sleep(wait).await {
            return Err(cancelled(call));
        }
        Ok(())
    }

    fn check_rate_limit_budget(
        &self,
        call: &CallDescriptor,
        attempts: usize,
        waits: usize,
        wait: Duration,
        reason: &str,
    ) -> Result<(), TransportError> {
        if waits > self.config.max_rate_limit_waits {
            return Err(TransportError::Unavailable {
                operation: call.operation.clone(),
                attempts,
                reason: format!("rate limited {waits} times: {reason}"),
            });
        }
        if duration_ms(wait) > self.config.max_rate_limit_wait_ms {
            return Err(TransportError::Unavailable {
                operation: call.operation.clone(),
                attempts,
                reason: format!(
                    "rate-limit reset in {}ms exceeds the {}ms wait limit: {reason}",
                    duration_ms(wait),
                    self.config.max_rate_limit_wait_ms
                ),
            });
        }
        Ok(())
    }

    fn warn_on_low_quota(&self, call: &CallDescriptor) {
        if let Some(remaining) = self.rate_limit.remaining() {
            if remaining < self.config.low_quota_buffer {
                warn!(
                    operation = %call.operation,
                    remaining,
                    "remote API rate-limit quota running low"
                );
            }
        }
    }
}

fn cancelled(call: &CallDescriptor) -> TransportError {
    TransportError::Cancelled {
        operation: call.operation.clone(),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
