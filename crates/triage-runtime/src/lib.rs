//! Coordinator runtime: configuration, the local session ledger, and the task
//! flow that ties the issue tracker to remote agent sessions.

pub mod config;
pub mod session_ledger;
pub mod triage_runtime;

pub use config::{TriageConfig, MIN_POLL_TIMEOUT};
pub use session_ledger::{
    SessionLedger, SessionRecord, SESSION_LEDGER_FILE_NAME, SESSION_LEDGER_SCHEMA_VERSION,
};
pub use triage_runtime::{IssueSummary, RunOptions, TaskOutcome, TaskState, TriageRuntime};
