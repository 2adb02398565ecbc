//! Resilient transport shared by every remote call the triage coordinator makes.
//!
//! A single logical call (create session, fetch session, list issues, ...) is
//! retried with capped exponential backoff on transient failures, waits out
//! rate limits using a process-wide [`RateLimitState`], and fails fast on
//! non-retryable client errors. All waits observe a [`CancelSignal`].

mod cancellation;
mod error;
mod rate_limit;
mod retry;
mod transport;

pub use cancellation::CancelSignal;
pub use error::{FailureClass, TransportError};
pub use rate_limit::{RateLimitSnapshot, RateLimitState};
pub use retry::{
    backoff_delay, classify_status, is_retryable_http_error, jittered_delay, new_request_id,
    parse_rate_limit_wait, truncate_for_error, RetryConfig,
};
pub use transport::{
    CallDescriptor, ResilientTransport, TransportMetricsSnapshot, TransportResponse,
    RETRY_ATTEMPT_HEADER,
};
