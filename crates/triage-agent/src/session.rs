use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Task phase a session was launched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Scoping,
    Executing,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scoping => "scoping",
            Self::Executing => "executing",
        }
    }

    /// Short form used in session tags (`phase:scope`, `phase:exec`).
    pub fn tag(self) -> &'static str {
        match self {
            Self::Scoping => "scope",
            Self::Executing => "exec",
        }
    }

    pub fn title_verb(self) -> &'static str {
        match self {
            Self::Scoping => "Scope",
            Self::Executing => "Execute",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Scoping => "Scoping",
            Self::Executing => "Execution",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of remote session states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Working,
    Blocked,
    SuspendRequested,
    ResumeRequested,
    Resumed,
    Finished,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::SuspendRequested => "suspend_requested",
            Self::ResumeRequested => "resume_requested",
            Self::Resumed => "resumed",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
        }
    }

    pub fn from_raw(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "working" | "running" => Some(Self::Working),
            "blocked" => Some(Self::Blocked),
            "suspend_requested" => Some(Self::SuspendRequested),
            "resume_requested" => Some(Self::ResumeRequested),
            "resumed" => Some(Self::Resumed),
            "finished" => Some(Self::Finished),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Resolves the machine-readable `status_enum` first, then the
    /// human-readable label. Unrecognized values fall back to `Working`.
    pub fn normalize(status_enum: Option<&str>, status_label: Option<&str>) -> Self {
        let candidates = [status_enum, status_label];
        for raw in candidates.into_iter().flatten() {
            if raw.trim().is_empty() {
                continue;
            }
            if let Some(status) = Self::from_raw(raw) {
                return status;
            }
        }
        if let Some(raw) = candidates
            .into_iter()
            .flatten()
            .find(|raw| !raw.trim().is_empty())
        {
            warn!(raw_status = raw, "unrecognized session status; treating as working");
        }
        Self::Working
    }

    /// Terminal for a polling run. `Blocked` ends the loop but the session
    /// itself can continue once nudged.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Blocked | Self::Stopped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

pub const AGENT_MESSAGE_KIND: &str = "devin_message";

impl SessionMessage {
    pub fn agent(message: impl Into<String>) -> Self {
        Self {
            kind: Some(AGENT_MESSAGE_KIND.to_string()),
            message: message.into(),
            timestamp: None,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: Some("user_message".to_string()),
            message: message.into(),
            timestamp: None,
        }
    }

    /// Messages without a type are attributed to the agent.
    pub fn is_agent_authored(&self) -> bool {
        match self.kind.as_deref() {
            None => true,
            Some(kind) => kind == AGENT_MESSAGE_KIND,
        }
    }
}

/// Latest server-side view of a session, already normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub status_label: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

/// A remote session as tracked locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub phase: SessionPhase,
    pub status: SessionStatus,
    pub status_label: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub title: Option<String>,
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn new(id: impl Into<String>, phase: SessionPhase) -> Self {
        Self {
            id: id.into(),
            phase,
            status: SessionStatus::Working,
            status_label: None,
            url: None,
            created_at: None,
            updated_at: None,
            title: None,
            structured_output: None,
            messages: Vec::new(),
        }
    }

    /// Overwrites mutable state with the server snapshot. Identity fields
    /// (url, created_at, title) survive when the snapshot omits them.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) {
        self.status = snapshot.status;
        self.status_label = snapshot.status_label;
        self.structured_output = snapshot.structured_output;
        self.messages = snapshot.messages;
        self.updated_at = snapshot.updated_at;
        if snapshot.url.is_some() {
            self.url = snapshot.url;
        }
        if snapshot.created_at.is_some() {
            self.created_at = snapshot.created_at;
        }
        if snapshot.title.is_some() {
            self.title = snapshot.title;
        }
    }
}
