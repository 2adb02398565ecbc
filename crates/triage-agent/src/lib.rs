//! Remote agent sessions: the session model, output schemas, the launcher
//! that starts a session, the poller that drives it to a terminal state, and
//! the extractor that recovers structured results from each snapshot.

pub mod devin_client;
pub mod extractor;
pub mod launcher;
pub mod poller;
pub mod schema;
pub mod session;

pub use devin_client::{
    AgentApi, CreateSessionRequest, CreatedSession, DevinClient, DevinClientConfig,
    DEFAULT_DEVIN_API_URL,
};
pub use extractor::{extract, extract_from_text, text_summary, ExtractedResult, Provenance};
pub use launcher::{
    build_prompt, launch_session, session_tags, session_title, LaunchRequest, LaunchedSession,
    TaskContext, TaskRef, MAX_PROMPT_COMMENTS,
};
pub use poller::{
    poll_until_terminal, OutcomeKind, PolicyError, PollError, PollOutcome, RetryPolicy,
};
pub use schema::{
    ExecutionReport, FieldKind, FieldSpec, OutputSchema, SchemaError, ScopingReport,
};
pub use session::{Session, SessionMessage, SessionPhase, SessionSnapshot, SessionStatus};
