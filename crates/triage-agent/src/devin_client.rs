use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use triage_transport::{
    CallDescriptor, CancelSignal, RateLimitState, ResilientTransport, RetryConfig, TransportError,
};

use crate::session::{SessionMessage, SessionSnapshot, SessionStatus};

pub const DEFAULT_DEVIN_API_URL: &str = "https://api.devin.ai/v1";

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSessionRequest {
    pub prompt: String,
    /// Ask the server to reuse an existing session for an identical prompt.
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub url: Option<String>,
    pub is_new: bool,
}

/// Remote agent session API.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
        cancel: &CancelSignal,
    ) -> Result<CreatedSession, TransportError>;

    async fn get_session(
        &self,
        session_id: &str,
        cancel: &CancelSignal,
    ) -> Result<SessionSnapshot, TransportError>;

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancelSignal,
    ) -> Result<(), TransportError>;
}

/// Session resource as returned by the Devin API.
#[derive(Debug, Clone, Default, Deserialize)]
struct SessionPayload {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_enum: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    structured_output: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_new_session: Option<bool>,
    #[serde(default)]
    messages: Option<Vec<SessionMessage>>,
}

impl SessionPayload {
    fn into_snapshot(self, requested_id: &str) -> SessionSnapshot {
        let status = SessionStatus::normalize(self.status_enum.as_deref(), self.status.as_deref());
        let session_id = if self.session_id.trim().is_empty() {
            requested_id.to_string()
        } else {
            self.session_id
        };
        SessionSnapshot {
            session_id,
            status,
            status_label: self.status,
            title: self.title,
            url: self.url,
            created_at: self.created_at,
            updated_at: self.updated_at,
            structured_output: self.structured_output,
            messages: self.messages.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DevinClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for DevinClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_DEVIN_API_URL.to_string(),
            api_key: String::new(),
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

/// [`AgentApi`] over the Devin REST API.
#[derive(Debug, Clone)]
pub struct DevinClient {
    transport: ResilientTransport,
    api_base: String,
}

impl DevinClient {
    pub fn new(config: DevinClientConfig, rate_limit: Arc<RateLimitState>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("triage-coordinator"));
        let auth_header = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_header).context("invalid devin authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create devin api client")?;
        Ok(Self {
            transport: ResilientTransport::new(http, config.retry, rate_limit),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.api_base, session_id.trim())
    }
}

#[async_trait]
impl AgentApi for DevinClient {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
        cancel: &CancelSignal,
    ) -> Result<CreatedSession, TransportError> {
        let body = serde_json::to_value(request).map_err(|error| {
            TransportError::Client(format!("failed to encode create session request: {error}"))
        })?;
        let call = CallDescriptor::post(
            "create session",
            format!("{}/sessions", self.api_base),
            body,
        );
        let payload: SessionPayload = self.transport.call_json(&call, cancel).await?;
        if payload.session_id.trim().is_empty() {
            return Err(TransportError::Decode {
                operation: "create session".to_string(),
                source: serde::de::Error::custom("response did not include a session_id"),
            });
        }
        let created = CreatedSession {
            is_new: payload.is_new_session.unwrap_or(true),
            url: payload.url,
            session_id: payload.session_id,
        };
        info!(
            session_id = %created.session_id,
            is_new = created.is_new,
            "agent session created"
        );
        Ok(created)
    }

    async fn get_session(
        &self,
        session_id: &str,
        cancel: &CancelSignal,
    ) -> Result<SessionSnapshot, TransportError> {
        let call = CallDescriptor::get("get session", self.session_url(session_id));
        let payload: SessionPayload = self.transport.call_json(&call, cancel).await?;
        let snapshot = payload.into_snapshot(session_id);
        debug!(
            session_id,
            status = %snapshot.status,
            messages = snapshot.messages.len(),
            has_output = snapshot.structured_output.is_some(),
            "fetched agent session"
        );
        Ok(snapshot)
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancelSignal,
    ) -> Result<(), TransportError> {
        let call = CallDescriptor::post(
            "send session message",
            format!("{}/message", self.session_url(session_id)),
            json!({ "message": message }),
        );
        self.transport.call(&call, cancel).await?;
        info!(session_id, "message sent to agent session");
        Ok(())
    }
}
