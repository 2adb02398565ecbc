use std::time::Duration;

use thiserror::Error;

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network error, 5xx, 408, or 429 without a reset signal.
    Transient,
    /// Quota exhausted; `retry_after` is the reported reset when one was sent.
    RateLimited { retry_after: Option<Duration> },
    /// Any other 4xx. Retrying cannot help.
    Invalid,
}

/// Terminal failure of a logical remote call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{operation} rejected with status {status}: {body}")]
    Invalid {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("{operation} unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        operation: String,
        attempts: usize,
        reason: String,
    },
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
    #[error("failed to decode {operation} response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("transport client error: {0}")]
    Client(String),
}

impl TransportError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Invalid { status, .. } => Some(*status),
            _ => None,
        }
    }
}
