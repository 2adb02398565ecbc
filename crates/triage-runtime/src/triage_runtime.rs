//! Task orchestration: launch, poll, record and report agent sessions for
//! GitHub issues.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use triage_agent::{
    extract, launch_session, poll_until_terminal, text_summary, AgentApi, DevinClient,
    DevinClientConfig, ExtractedResult, LaunchRequest, OutcomeKind, OutputSchema, PollOutcome,
    Provenance, Session, SessionPhase, SessionStatus, TaskContext, TaskRef,
};
use triage_github::issue_comment::{
    render_session_result_comment, render_session_started_comment, SessionResultCommentView,
    SessionStartedCommentView,
};
use triage_github::{GithubClientConfig, GithubIssuesClient, IssueListFilters, RepoRef};
use triage_transport::{CancelSignal, RateLimitState};

use crate::config::TriageConfig;
use crate::session_ledger::{SessionLedger, SessionRecord};

/// Externally visible state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Session created; not polled.
    Launched,
    /// Observed once and still running.
    Running,
    Finished,
    NeedsAttention,
    Stopped,
    TimedOut,
    Cancelled,
}

impl From<OutcomeKind> for TaskState {
    fn from(kind: OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Finished => Self::Finished,
            OutcomeKind::NeedsAttention => Self::NeedsAttention,
            OutcomeKind::Stopped => Self::Stopped,
            OutcomeKind::TimedOut => Self::TimedOut,
            OutcomeKind::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub session_id: String,
    pub session_url: Option<String>,
    pub repo: String,
    pub issue_number: u64,
    pub phase: SessionPhase,
    pub state: TaskState,
    pub status: SessionStatus,
    pub status_label: Option<String>,
    pub terminal: bool,
    /// The remote session may still progress; `resume` can pick it up by id.
    pub resumable: bool,
    pub is_new_session: bool,
    pub result: Option<Map<String, Value>>,
    pub provenance: Option<Provenance>,
    /// Last agent message, reported when no structured result exists.
    pub agent_summary: Option<String>,
    pub elapsed_ms: u64,
    pub cycles: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: String,
    pub labels: Vec<String>,
    pub updated_at: String,
    pub comments: u64,
    pub last_session_id: Option<String>,
    pub last_confidence: Option<f64>,
    pub last_risk_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Reuse a still-active recorded session and ask the server for idempotent creation.
    pub reuse: bool,
    /// Poll to a terminal state; when false the task returns right after launch.
    pub wait: bool,
    /// Overrides `TriageConfig::post_comments` for this run.
    pub post_comments: Option<bool>,
    /// Overrides the configured poll deadline for this run.
    pub poll_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reuse: true,
            wait: true,
            post_comments: None,
            poll_timeout: None,
        }
    }
}

pub struct TriageRuntime {
    config: TriageConfig,
    github: GithubIssuesClient,
    agent: Arc<dyn AgentApi>,
    ledger: Mutex<SessionLedger>,
    in_flight: Mutex<HashSet<String>>,
}

struct InFlightGuard<'a> {
    sessions: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
    }
}

impl TriageRuntime {
    /// Builds GitHub and Devin clients, each with its own rate-limit state.
    pub fn new(config: TriageConfig) -> Result<Self> {
        let github = GithubIssuesClient::new(
            GithubClientConfig {
                api_base: config.github_api_base.clone(),
                token: config.github_token.clone(),
                request_timeout_ms: config.request_timeout_ms,
                retry: config.github_retry(),
            },
            RateLimitState::shared(),
        )?;
        let agent = DevinClient::new(
            DevinClientConfig {
                api_base: config.devin_api_url.clone(),
                api_key: config.devin_api_key.clone(),
                request_timeout_ms: config.request_timeout_ms,
                retry: config.devin_retry(),
            },
            RateLimitState::shared(),
        )?;
        Self::with_clients(config, github, Arc::new(agent))
    }

    pub fn with_clients(
        config: TriageConfig,
        github: GithubIssuesClient,
        agent: Arc<dyn AgentApi>,
    ) -> Result<Self> {
        config.poll_policy(None).context("invalid poll policy")?;
        let ledger = SessionLedger::load(config.ledger_path())?;
        Ok(Self {
            config,
            github,
            agent,
            ledger: Mutex::new(ledger),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Lists issues and annotates each with the last recorded scoping result.
    pub async fn list_issues(
        &self,
        repo: &RepoRef,
        filters: &IssueListFilters,
        cancel: &CancelSignal,
    ) -> Result<Vec<IssueSummary>> {
        let issues = self
            .github
            .list_issues(repo, filters, cancel)
            .await
            .with_context(|| format!("failed to list issues for {repo}"))?;
        let slug = repo.as_slug();
        let ledger = self.ledger()?;
        Ok(issues
            .into_iter()
            .map(|issue| {
                let scoped = ledger.latest_result_for(&slug, issue.number, SessionPhase::Scoping);
                IssueSummary {
                    labels: issue.label_names().into_iter().map(str::to_string).collect(),
                    last_session_id: scoped.map(|record| record.session_id.clone()),
                    last_confidence: scoped.and_then(SessionRecord::confidence),
                    last_risk_level: scoped
                        .and_then(|record| record.structured_output.as_ref())
                        .and_then(|output| output.get("risk_level"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    number: issue.number,
                    title: issue.title,
                    state: issue.state,
                    html_url: issue.html_url,
                    updated_at: issue.updated_at,
                    comments: issue.comments,
                }
            })
            .collect())
    }

    /// Builds the launch context from the issue, its comments and, for
    /// execution, the last recorded scoping result.
    pub async fn load_context(
        &self,
        task: &TaskRef,
        phase: SessionPhase,
        cancel: &CancelSignal,
    ) -> Result<TaskContext> {
        let repo = RepoRef::parse(&task.repo)?;
        let issue = self
            .github
            .get_issue(&repo, task.issue_number, cancel)
            .await
            .with_context(|| format!("failed to load issue {task}"))?;
        if issue.is_pull_request() {
            bail!("{task} is a pull request, not an issue");
        }
        let comments = self
            .github
            .get_comments(&repo, task.issue_number, cancel)
            .await
            .with_context(|| format!("failed to load comments for {task}"))?;

        let scoping_result = match phase {
            SessionPhase::Scoping => None,
            SessionPhase::Executing => {
                let scoped = self
                    .ledger()?
                    .latest_result_for(&task.repo, task.issue_number, SessionPhase::Scoping)
                    .and_then(|record| record.structured_output.clone());
                if scoped.is_none() {
                    warn!(
                        task = %task,
                        "no recorded scoping result; execution prompt will carry no plan"
                    );
                }
                scoped
            }
        };

        Ok(TaskContext {
            title: issue.title,
            body: issue.body,
            comments: comments
                .into_iter()
                .filter_map(|comment| comment.body)
                .filter(|body| !body.trim().is_empty())
                .collect(),
            scoping_result,
        })
    }

    /// Launches (or reuses) a session for the task and, unless `options.wait`
    /// is false, polls it to a terminal state, timeout or cancellation.
    pub async fn run_task(
        &self,
        phase: SessionPhase,
        task: &TaskRef,
        context: &TaskContext,
        options: &RunOptions,
        cancel: &CancelSignal,
    ) -> Result<TaskOutcome> {
        let repo = RepoRef::parse(&task.repo)?;
        let schema = OutputSchema::for_phase(phase);
        let reusable = if options.reuse {
            self.ledger()?
                .latest_for(&task.repo, task.issue_number, phase)
                .filter(|record| record.is_active())
                .cloned()
        } else {
            None
        };

        let (session, is_new) = match reusable {
            Some(record) => {
                info!(
                    task = %task,
                    session_id = %record.session_id,
                    "reusing active session from ledger"
                );
                (session_from_record(&record), false)
            }
            None => {
                let launched = launch_session(
                    self.agent.as_ref(),
                    LaunchRequest {
                        phase,
                        task,
                        context,
                        schema: &schema,
                        reuse: options.reuse,
                    },
                    cancel,
                )
                .await
                .with_context(|| format!("failed to launch {phase} session for {task}"))?;
                info!(
                    task = %task,
                    session_id = %launched.session.id,
                    is_new = launched.is_new,
                    "agent session launched"
                );
                self.record(task, &launched.session, None, None)?;
                if self.comments_enabled(options) {
                    let body = render_session_started_comment(SessionStartedCommentView {
                        phase: phase.display_name(),
                        session_id: &launched.session.id,
                        session_url: launched.session.url.as_deref(),
                        reused: !launched.is_new,
                    });
                    self.post_comment(&repo, task.issue_number, &body, cancel)
                        .await;
                }
                (launched.session, launched.is_new)
            }
        };

        if !options.wait {
            return Ok(launched_outcome(task, &session, is_new));
        }
        self.poll_and_record(task, &repo, session, is_new, &schema, options, cancel)
            .await
    }

    /// Re-polls a recorded session, typically one that timed out or was cancelled.
    pub async fn resume(
        &self,
        session_id: &str,
        options: &RunOptions,
        cancel: &CancelSignal,
    ) -> Result<TaskOutcome> {
        let record = self.recorded(session_id)?;
        let task = TaskRef::new(record.repo.clone(), record.issue_number);
        let repo = RepoRef::parse(&task.repo)?;
        let schema = OutputSchema::for_phase(record.phase);
        info!(session_id, task = %task, "resuming session");
        self.poll_and_record(
            &task,
            &repo,
            session_from_record(&record),
            false,
            &schema,
            options,
            cancel,
        )
        .await
    }

    /// Fetches a recorded session once and reports its current state.
    pub async fn session_status(
        &self,
        session_id: &str,
        cancel: &CancelSignal,
    ) -> Result<TaskOutcome> {
        let record = self.recorded(session_id)?;
        let task = TaskRef::new(record.repo.clone(), record.issue_number);
        let mut session = session_from_record(&record);
        let snapshot = self
            .agent
            .get_session(session_id, cancel)
            .await
            .with_context(|| format!("failed to fetch session {session_id}"))?;
        session.apply_snapshot(snapshot);
        let schema = OutputSchema::for_phase(session.phase);
        let extracted = extract(&session, &schema);
        let kind = OutcomeKind::from_terminal_status(session.status);
        let record = self.record(&task, &session, kind, extracted.as_ref())?;
        let state = kind.map(TaskState::from).unwrap_or(TaskState::Running);
        Ok(TaskOutcome {
            session_id: session.id.clone(),
            session_url: session.url.clone(),
            repo: task.repo,
            issue_number: task.issue_number,
            phase: session.phase,
            state,
            status: session.status,
            status_label: session.status_label.clone(),
            terminal: kind.is_some(),
            resumable: kind.is_none(),
            is_new_session: false,
            agent_summary: summary_if_missing(&record, &session),
            result: record.structured_output,
            provenance: record.provenance,
            elapsed_ms: 0,
            cycles: 1,
        })
    }

    /// Sends a message to a session, e.g. to unblock one that needs attention.
    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let message = message.trim();
        if message.is_empty() {
            bail!("message cannot be empty");
        }
        self.agent
            .send_message(session_id, message, cancel)
            .await
            .with_context(|| format!("failed to send message to session {session_id}"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll_and_record(
        &self,
        task: &TaskRef,
        repo: &RepoRef,
        session: Session,
        is_new: bool,
        schema: &OutputSchema,
        options: &RunOptions,
        cancel: &CancelSignal,
    ) -> Result<TaskOutcome> {
        let session_id = session.id.clone();
        let _guard = self.acquire(&session_id)?;
        let policy = self
            .config
            .poll_policy(options.poll_timeout)
            .context("invalid poll policy")?;
        let outcome =
            match poll_until_terminal(self.agent.as_ref(), session, schema, &policy, cancel).await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    if let Err(record_error) =
                        self.record(task, &error.session, None, error.result.as_ref())
                    {
                        warn!(
                            session_id = %session_id,
                            error = %record_error,
                            "failed to record partial result after poll failure"
                        );
                    }
                    return Err(error)
                        .with_context(|| format!("failed to poll session {session_id}"));
                }
            };
        let record = self.record(
            task,
            &outcome.session,
            Some(outcome.kind),
            outcome.result.as_ref(),
        )?;

        if self.comments_enabled(options) && outcome.kind != OutcomeKind::Cancelled {
            let body = render_session_result_comment(SessionResultCommentView {
                phase: outcome.session.phase.display_name(),
                session_id: &session_id,
                session_url: outcome.session.url.as_deref(),
                outcome: outcome.kind.as_str(),
                provenance: record.provenance.map(Provenance::as_str),
                result: record
                    .structured_output
                    .as_ref()
                    .map(|output| Value::Object(output.clone()))
                    .as_ref(),
                elapsed_seconds: outcome.elapsed.as_secs_f64(),
            });
            self.post_comment(repo, task.issue_number, &body, cancel)
                .await;
        }
        Ok(polled_outcome(task, &outcome, is_new, record))
    }

    /// Upserts the ledger record for `session` and saves the ledger. A missing
    /// `kind` or `extracted` keeps the previously recorded value.
    fn record(
        &self,
        task: &TaskRef,
        session: &Session,
        kind: Option<OutcomeKind>,
        extracted: Option<&ExtractedResult>,
    ) -> Result<SessionRecord> {
        let mut ledger = self.ledger()?;
        let previous = ledger.get(&session.id).cloned();
        let (structured_output, provenance) = match extracted {
            Some(extracted) => (Some(extracted.payload.clone()), Some(extracted.provenance)),
            None => previous
                .as_ref()
                .map(|record| (record.structured_output.clone(), record.provenance))
                .unwrap_or((None, None)),
        };
        ledger.upsert(SessionRecord {
            session_id: session.id.clone(),
            repo: task.repo.clone(),
            issue_number: task.issue_number,
            phase: session.phase,
            status: session.status,
            status_label: session.status_label.clone(),
            outcome: kind.or(previous.as_ref().and_then(|record| record.outcome)),
            url: session.url.clone(),
            title: session.title.clone(),
            structured_output,
            provenance,
            created_unix_ms: previous.as_ref().map_or(0, |record| record.created_unix_ms),
            updated_unix_ms: 0,
        });
        ledger.save()?;
        ledger
            .get(&session.id)
            .cloned()
            .ok_or_else(|| anyhow!("session {} missing from ledger after upsert", session.id))
    }

    fn recorded(&self, session_id: &str) -> Result<SessionRecord> {
        let ledger = self.ledger()?;
        ledger.get(session_id).cloned().ok_or_else(|| {
            anyhow!(
                "unknown session '{session_id}': no record in {}",
                ledger.path().display()
            )
        })
    }

    fn ledger(&self) -> Result<MutexGuard<'_, SessionLedger>> {
        self.ledger
            .lock()
            .map_err(|_| anyhow!("session ledger lock poisoned"))
    }

    fn acquire(&self, session_id: &str) -> Result<InFlightGuard<'_>> {
        let mut sessions = self
            .in_flight
            .lock()
            .map_err(|_| anyhow!("in-flight session set lock poisoned"))?;
        if !sessions.insert(session_id.to_string()) {
            bail!("session '{session_id}' is already being polled");
        }
        Ok(InFlightGuard {
            sessions: &self.in_flight,
            session_id: session_id.to_string(),
        })
    }

    fn comments_enabled(&self, options: &RunOptions) -> bool {
        options.post_comments.unwrap_or(self.config.post_comments)
    }

    async fn post_comment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        body: &str,
        cancel: &CancelSignal,
    ) {
        match self
            .github
            .create_comment(repo, issue_number, body, cancel)
            .await
        {
            Ok(comment) => info!(
                repo = %repo,
                issue_number,
                comment_id = comment.id,
                "posted progress comment"
            ),
            Err(error) => warn!(
                repo = %repo,
                issue_number,
                error = %error,
                "failed to post progress comment; continuing"
            ),
        }
    }
}

fn session_from_record(record: &SessionRecord) -> Session {
    let mut session = Session::new(record.session_id.clone(), record.phase);
    session.status = record.status;
    session.status_label = record.status_label.clone();
    session.url = record.url.clone();
    session.title = record.title.clone();
    session
}

fn launched_outcome(task: &TaskRef, session: &Session, is_new: bool) -> TaskOutcome {
    TaskOutcome {
        session_id: session.id.clone(),
        session_url: session.url.clone(),
        repo: task.repo.clone(),
        issue_number: task.issue_number,
        phase: session.phase,
        state: TaskState::Launched,
        status: session.status,
        status_label: session.status_label.clone(),
        terminal: false,
        resumable: true,
        is_new_session: is_new,
        result: None,
        provenance: None,
        agent_summary: None,
        elapsed_ms: 0,
        cycles: 0,
    }
}

fn polled_outcome(
    task: &TaskRef,
    outcome: &PollOutcome,
    is_new: bool,
    record: SessionRecord,
) -> TaskOutcome {
    TaskOutcome {
        session_id: outcome.session.id.clone(),
        session_url: outcome.session.url.clone(),
        repo: task.repo.clone(),
        issue_number: task.issue_number,
        phase: outcome.session.phase,
        state: TaskState::from(outcome.kind),
        status: outcome.session.status,
        status_label: outcome.session.status_label.clone(),
        terminal: outcome.terminal,
        resumable: outcome.kind.is_resumable(),
        is_new_session: is_new,
        agent_summary: summary_if_missing(&record, &outcome.session),
        result: record.structured_output,
        provenance: record.provenance,
        elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        cycles: outcome.cycles,
    }
}

fn summary_if_missing(record: &SessionRecord, session: &Session) -> Option<String> {
    if record.structured_output.is_some() {
        None
    } else {
        text_summary(session)
    }
}
