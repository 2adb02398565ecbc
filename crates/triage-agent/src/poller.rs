use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use triage_transport::{CancelSignal, TransportError};

use crate::devin_client::AgentApi;
use crate::extractor::{extract, ExtractedResult};
use crate::schema::OutputSchema;
use crate::session::{Session, SessionStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
    #[error("initial poll interval {initial:?} exceeds the maximum {max:?}")]
    InitialAboveMax { initial: Duration, max: Duration },
    #[error("poll growth factor must be a finite number >= 1 (got {0})")]
    InvalidGrowthFactor(f64),
    #[error("poll deadline must be greater than zero")]
    ZeroDeadline,
}

/// Poll backoff: geometric growth from `initial_interval` toward
/// `max_interval`, bounded overall by `deadline`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    max_interval: Duration,
    growth_factor: f64,
    deadline: Duration,
}

impl RetryPolicy {
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        growth_factor: f64,
        deadline: Duration,
    ) -> Result<Self, PolicyError> {
        if initial_interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if initial_interval > max_interval {
            return Err(PolicyError::InitialAboveMax {
                initial: initial_interval,
                max: max_interval,
            });
        }
        if !growth_factor.is_finite() || growth_factor < 1.0 {
            return Err(PolicyError::InvalidGrowthFactor(growth_factor));
        }
        if deadline.is_zero() {
            return Err(PolicyError::ZeroDeadline);
        }
        Ok(Self {
            initial_interval,
            max_interval,
            growth_factor,
            deadline,
        })
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.growth_factor)
            .unwrap_or(self.max_interval);
        grown.min(self.max_interval).max(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Finished,
    NeedsAttention,
    Stopped,
    TimedOut,
    Cancelled,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::NeedsAttention => "needs_attention",
            Self::Stopped => "stopped",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::NeedsAttention | Self::Stopped)
    }

    /// The remote session may still be progressing and can be re-polled.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::TimedOut | Self::Cancelled)
    }

    /// Outcome implied by a terminal session status; `None` for non-terminal ones.
    pub fn from_terminal_status(status: SessionStatus) -> Option<Self> {
        match status {
            SessionStatus::Finished => Some(Self::Finished),
            SessionStatus::Blocked => Some(Self::NeedsAttention),
            SessionStatus::Stopped => Some(Self::Stopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub kind: OutcomeKind,
    pub session: Session,
    pub elapsed: Duration,
    pub terminal: bool,
    pub result: Option<ExtractedResult>,
    pub cycles: u32,
}

/// A fetch failed for a reason the transport could not absorb. Carries the
/// session as last observed and any result extracted before the failure.
#[derive(Debug, Error)]
#[error("polling session {} failed after {cycles} cycle(s)", .session.id)]
pub struct PollError {
    #[source]
    pub source: TransportError,
    pub session: Session,
    pub result: Option<ExtractedResult>,
    pub cycles: u32,
}

impl PollError {
    pub fn transport(&self) -> &TransportError {
        &self.source
    }
}

/// Polls `session` until it reaches a terminal status, the policy deadline
/// passes, or `cancel` fires. Extraction runs on every fetched snapshot;
/// a later failed extraction never discards an earlier result.
///
/// A single fetch may overrun the deadline by at most the current poll
/// interval; a fetch still pending then is abandoned and the outcome is
/// `TimedOut`.
pub async fn poll_until_terminal(
    api: &dyn AgentApi,
    mut session: Session,
    schema: &OutputSchema,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) -> Result<PollOutcome, PollError> {
    let started = Instant::now();
    let deadline_at = started + policy.deadline();
    let mut interval = policy.initial_interval();
    let mut result: Option<ExtractedResult> = None;
    let mut cycles = 0_u32;

    info!(
        session_id = %session.id,
        phase = %session.phase,
        initial_interval_ms = duration_ms(interval),
        deadline_ms = duration_ms(policy.deadline()),
        "polling agent session"
    );

    loop {
        if cancel.is_cancelled() {
            return Ok(finish(OutcomeKind::Cancelled, session, started, result, cycles));
        }
        let fetch = api.get_session(&session.id, cancel);
        let snapshot = match tokio::time::timeout_at(deadline_at + interval, fetch).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(error)) if error.is_cancelled() => {
                return Ok(finish(OutcomeKind::Cancelled, session, started, result, cycles));
            }
            Ok(Err(error)) => {
                warn!(
                    session_id = %session.id,
                    cycles,
                    has_result = result.is_some(),
                    error = %error,
                    "session fetch failed"
                );
                return Err(PollError {
                    source: error,
                    session,
                    result,
                    cycles,
                });
            }
            Err(_) => {
                warn!(
                    session_id = %session.id,
                    cycles,
                    elapsed_ms = duration_ms(started.elapsed()),
                    "session fetch outlived the poll deadline; abandoning it"
                );
                return Ok(finish(OutcomeKind::TimedOut, session, started, result, cycles));
            }
        };
        cycles = cycles.saturating_add(1);
        session.apply_snapshot(snapshot);

        if let Some(extracted) = extract(&session, schema) {
            result = Some(extracted);
        }
        debug!(
            session_id = %session.id,
            cycle = cycles,
            status = %session.status,
            has_result = result.is_some(),
            elapsed_ms = duration_ms(started.elapsed()),
            "poll cycle complete"
        );

        if let Some(kind) = OutcomeKind::from_terminal_status(session.status) {
            info!(
                session_id = %session.id,
                outcome = kind.as_str(),
                cycles,
                has_result = result.is_some(),
                "agent session reached terminal state"
            );
            return Ok(finish(kind, session, started, result, cycles));
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.deadline() {
            warn!(
                session_id = %session.id,
                cycles,
                elapsed_ms = duration_ms(elapsed),
                "poll deadline reached; session may still be running"
            );
            return Ok(finish(OutcomeKind::TimedOut, session, started, result, cycles));
        }

        if cancel.is_cancelled() {
            return Ok(finish(OutcomeKind::Cancelled, session, started, result, cycles));
        }
        let remaining = policy.deadline().saturating_sub(elapsed);
        if !cancel.sleep(interval.min(remaining)).await {
            return Ok(finish(OutcomeKind::Cancelled, session, started, result, cycles));
        }
        interval = policy.next_interval(interval);
    }
}

fn finish(
    kind: OutcomeKind,
    session: Session,
    started: Instant,
    result: Option<ExtractedResult>,
    cycles: u32,
) -> PollOutcome {
    PollOutcome {
        kind,
        session,
        elapsed: started.elapsed(),
        terminal: kind.is_terminal(),
        result,
        cycles,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
