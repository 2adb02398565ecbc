//! JSON persistence for launched sessions and their last known results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use triage_agent::{OutcomeKind, Provenance, SessionPhase, SessionStatus};
use triage_core::{
    current_unix_timestamp_ms, read_text_if_exists, remove_stale_staging_files, write_text_atomic,
};

pub const SESSION_LEDGER_SCHEMA_VERSION: u32 = 1;
pub const SESSION_LEDGER_FILE_NAME: &str = "sessions.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub repo: String,
    pub issue_number: u64,
    pub phase: SessionPhase,
    pub status: SessionStatus,
    #[serde(default)]
    pub status_label: Option<String>,
    /// Kind of the last completed poll, if any.
    #[serde(default)]
    pub outcome: Option<OutcomeKind>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub structured_output: Option<Map<String, Value>>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

impl SessionRecord {
    /// The remote session may still be running: never polled to a terminal
    /// state, or the last poll timed out or was cancelled.
    pub fn is_active(&self) -> bool {
        match self.outcome {
            Some(kind) => kind.is_resumable(),
            None => !self.status.is_terminal(),
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        self.structured_output
            .as_ref()?
            .get("confidence")
            .and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionLedgerState {
    schema_version: u32,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

impl Default for SessionLedgerState {
    fn default() -> Self {
        Self {
            schema_version: SESSION_LEDGER_SCHEMA_VERSION,
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct SessionLedger {
    path: PathBuf,
    state: SessionLedgerState,
}

impl SessionLedger {
    /// Loads the ledger; a missing, unreadable-as-JSON or foreign-version
    /// file starts an empty ledger.
    pub fn load(path: PathBuf) -> Result<Self> {
        match remove_stale_staging_files(&path) {
            Ok(0) => {}
            Ok(removed) => warn!(
                path = %path.display(),
                removed,
                "removed staging files left by an interrupted ledger save"
            ),
            Err(error) => warn!(
                path = %path.display(),
                error = %error,
                "failed to clean up ledger staging files"
            ),
        }
        let raw = read_text_if_exists(&path)
            .with_context(|| format!("failed to read session ledger {}", path.display()))?;
        let mut state = match raw {
            None => SessionLedgerState::default(),
            Some(raw) => match serde_json::from_str::<SessionLedgerState>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "failed to parse session ledger; starting fresh"
                    );
                    SessionLedgerState::default()
                }
            },
        };
        if state.schema_version != SESSION_LEDGER_SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                expected = SESSION_LEDGER_SCHEMA_VERSION,
                found = state.schema_version,
                "unsupported session ledger schema; starting fresh"
            );
            state = SessionLedgerState::default();
        }
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.state.sessions
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.state
            .sessions
            .iter()
            .find(|record| record.session_id == session_id)
    }

    /// Inserts or replaces by session id. `created_unix_ms` of an existing
    /// record is kept; `updated_unix_ms` is stamped now.
    pub fn upsert(&mut self, mut record: SessionRecord) {
        let now = current_unix_timestamp_ms();
        record.updated_unix_ms = now;
        match self
            .state
            .sessions
            .iter_mut()
            .find(|existing| existing.session_id == record.session_id)
        {
            Some(existing) => {
                record.created_unix_ms = existing.created_unix_ms;
                *existing = record;
            }
            None => {
                if record.created_unix_ms == 0 {
                    record.created_unix_ms = now;
                }
                self.state.sessions.push(record);
            }
        }
    }

    /// Most recently updated record for the issue and phase.
    pub fn latest_for(
        &self,
        repo: &str,
        issue_number: u64,
        phase: SessionPhase,
    ) -> Option<&SessionRecord> {
        self.matching(repo, issue_number, phase)
            .max_by_key(|record| record.updated_unix_ms)
    }

    /// Most recently updated record for the issue and phase that carries a result.
    pub fn latest_result_for(
        &self,
        repo: &str,
        issue_number: u64,
        phase: SessionPhase,
    ) -> Option<&SessionRecord> {
        self.matching(repo, issue_number, phase)
            .filter(|record| record.structured_output.is_some())
            .max_by_key(|record| record.updated_unix_ms)
    }

    pub fn save(&self) -> Result<()> {
        let mut payload = serde_json::to_string_pretty(&self.state)
            .context("failed to serialize session ledger")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write session ledger {}", self.path.display()))
    }

    fn matching<'a, 'r>(
        &'a self,
        repo: &'r str,
        issue_number: u64,
        phase: SessionPhase,
    ) -> impl Iterator<Item = &'a SessionRecord> + use<'a, 'r> {
        self.state.sessions.iter().filter(move |record| {
            record.repo.eq_ignore_ascii_case(repo)
                && record.issue_number == issue_number
                && record.phase == phase
        })
    }
}
