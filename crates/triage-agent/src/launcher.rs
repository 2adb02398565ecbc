use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use triage_transport::{CancelSignal, TransportError};

use crate::devin_client::{AgentApi, CreateSessionRequest};
use crate::schema::OutputSchema;
use crate::session::{Session, SessionPhase};

pub const MAX_PROMPT_COMMENTS: usize = 20;
const MAX_TITLE_CHARS: usize = 50;

/// Issue a task is about: repository slug (`owner/name`) and issue number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub repo: String,
    pub issue_number: u64,
}

impl TaskRef {
    pub fn new(repo: impl Into<String>, issue_number: u64) -> Self {
        Self {
            repo: repo.into(),
            issue_number,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.issue_number)
    }
}

/// Free-text context embedded in the launch prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    /// Validated scoping payload, used by the execution phase.
    #[serde(default)]
    pub scoping_result: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub phase: SessionPhase,
    pub task: &'a TaskRef,
    pub context: &'a TaskContext,
    pub schema: &'a OutputSchema,
    pub reuse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedSession {
    pub session: Session,
    pub is_new: bool,
}

/// Creates the remote session. Transport failures are returned unchanged.
pub async fn launch_session(
    api: &dyn AgentApi,
    request: LaunchRequest<'_>,
    cancel: &CancelSignal,
) -> Result<LaunchedSession, TransportError> {
    let title = session_title(request.phase, request.task, &request.context.title);
    let create = CreateSessionRequest {
        prompt: build_prompt(request.phase, request.task, request.context, request.schema),
        idempotent: request.reuse,
        title: Some(title.clone()),
        tags: session_tags(request.phase, request.task),
    };
    let created = api.create_session(&create, cancel).await?;
    let mut session = Session::new(created.session_id, request.phase);
    session.url = created.url;
    session.title = Some(title);
    Ok(LaunchedSession {
        session,
        is_new: created.is_new,
    })
}

pub fn session_title(phase: SessionPhase, task: &TaskRef, issue_title: &str) -> String {
    let short = issue_title
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect::<String>();
    format!("{} Issue #{}: {short}", phase.title_verb(), task.issue_number)
}

pub fn session_tags(phase: SessionPhase, task: &TaskRef) -> Vec<String> {
    vec![
        format!("issue-{}", task.issue_number),
        format!("repo:{}", task.repo),
        format!("phase:{}", phase.tag()),
    ]
}

pub fn build_prompt(
    phase: SessionPhase,
    task: &TaskRef,
    context: &TaskContext,
    schema: &OutputSchema,
) -> String {
    let mut prompt = match phase {
        SessionPhase::Scoping => format!(
            "You are triaging GitHub issue #{} in {}.\n\nThis is analysis only. Do not write code, create branches, or open pull requests.\n",
            task.issue_number, task.repo
        ),
        SessionPhase::Executing => format!(
            "Implement GitHub issue #{} in {}.\n\nCreate a feature branch, implement the change, add or update tests, and open a pull request.\n",
            task.issue_number, task.repo
        ),
    };

    prompt.push_str(&format!(
        "\n## Issue\n- Title: {}\n- Number: #{}\n- Repository: {}\n",
        context.title.trim(),
        task.issue_number,
        task.repo
    ));
    let body = context
        .body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .unwrap_or("No description provided.");
    prompt.push_str(&format!("\n## Description\n{body}\n"));
    prompt.push_str(&format!("\n## Comments\n{}\n", render_comments(&context.comments)));

    if phase == SessionPhase::Executing {
        prompt.push_str(&format!(
            "\n## Scoping result\n{}\n",
            render_scoping_result(context.scoping_result.as_ref())
        ));
    }

    prompt.push_str("\n## Structured output\n");
    prompt.push_str(match phase {
        SessionPhase::Scoping => {
            "Update the structured output as soon as your analysis is complete, using exactly these fields:\n"
        }
        SessionPhase::Executing => {
            "Update the structured output whenever you create the branch, run the tests, or open the pull request, using exactly these fields:\n"
        }
    });
    prompt.push_str(&schema.example_json());
    prompt.push_str("\n\nField rules:\n");
    for field in &schema.fields {
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            field.name,
            if field.required { "required" } else { "optional" },
            field.kind.describe()
        ));
    }
    if phase == SessionPhase::Executing {
        prompt.push_str("Move status through planning, coding, testing and done as you progress.\n");
    }
    prompt.push_str(
        "\nWhen you finish, repeat the final JSON object in a ```json fenced block in your last message.",
    );
    prompt
}

fn render_comments(comments: &[String]) -> String {
    let rendered = comments
        .iter()
        .map(|comment| comment.trim())
        .filter(|comment| !comment.is_empty())
        .take(MAX_PROMPT_COMMENTS)
        .enumerate()
        .map(|(index, comment)| format!("Comment {}:\n{comment}", index + 1))
        .collect::<Vec<_>>();
    if rendered.is_empty() {
        "No comments yet.".to_string()
    } else {
        rendered.join("\n\n")
    }
}

fn render_scoping_result(result: Option<&Map<String, Value>>) -> String {
    let Some(result) = result else {
        return "No scoping result available.".to_string();
    };
    let mut lines = Vec::new();
    if let Some(summary) = result.get("summary").and_then(Value::as_str) {
        lines.push(format!("Summary: {summary}"));
    }
    if let Some(plan) = result.get("plan").and_then(Value::as_array) {
        lines.push("Plan:".to_string());
        for (index, step) in plan.iter().filter_map(Value::as_str).enumerate() {
            lines.push(format!("{}. {step}", index + 1));
        }
    }
    if let Some(risk) = result.get("risk_level").and_then(Value::as_str) {
        lines.push(format!("Risk level: {risk}"));
    }
    if let Some(hours) = result.get("est_effort_hours").and_then(Value::as_f64) {
        lines.push(format!("Estimated effort: {hours} hours"));
    }
    if lines.is_empty() {
        "No scoping result available.".to_string()
    } else {
        lines.join("\n")
    }
}
