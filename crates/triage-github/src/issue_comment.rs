use serde_json::Value;

pub const SESSION_MARKER_PREFIX: &str = "<!-- triage-session:";
pub const SESSION_MARKER_SUFFIX: &str = " -->";

#[derive(Debug, Clone, Copy)]
pub struct SessionStartedCommentView<'a> {
    /// Human-readable phase name, e.g. `Scoping` or `Execution`.
    pub phase: &'a str,
    pub session_id: &'a str,
    pub session_url: Option<&'a str>,
    pub reused: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionResultCommentView<'a> {
    pub phase: &'a str,
    pub session_id: &'a str,
    pub session_url: Option<&'a str>,
    /// Outcome kind such as `finished`, `needs_attention` or `timed_out`.
    pub outcome: &'a str,
    pub provenance: Option<&'a str>,
    pub result: Option<&'a Value>,
    pub elapsed_seconds: f64,
}

pub fn render_session_started_comment(view: SessionStartedCommentView<'_>) -> String {
    let action = if view.reused { "resumed" } else { "started" };
    format!(
        "**{} session {action}**\n\n- Session ID: `{}`\n- Session URL: {}\n- Status: working\n\nResults will be posted here when the session reaches a terminal state.\n\n---\n{}",
        phase_label(view.phase),
        view.session_id,
        view.session_url.unwrap_or("n/a"),
        session_marker(view.session_id)
    )
}

pub fn render_session_result_comment(view: SessionResultCommentView<'_>) -> String {
    let mut body = format!(
        "**{} session {}**\n\n- Session ID: `{}`\n- Session URL: {}\n- Elapsed: {:.0}s\n",
        phase_label(view.phase),
        outcome_headline(view.outcome),
        view.session_id,
        view.session_url.unwrap_or("n/a"),
        view.elapsed_seconds.max(0.0)
    );
    match view.result {
        Some(Value::Object(fields)) => {
            body.push_str(&format!(
                "\n**Structured result** (source `{}`)\n\n",
                view.provenance.unwrap_or("unknown")
            ));
            for (key, value) in fields {
                body.push_str(&render_field(key, value));
            }
        }
        Some(other) => {
            body.push_str(&format!("\n**Structured result**\n\n`{other}`\n"));
        }
        None => {
            body.push_str("\nNo structured result was reported by the session.\n");
        }
    }
    if matches!(view.outcome, "timed_out" | "cancelled") {
        body.push_str("\nThe session may still be progressing remotely; it can be resumed by id.\n");
    }
    body.push_str(&format!("\n---\n{}", session_marker(view.session_id)));
    body
}

pub fn session_marker(session_id: &str) -> String {
    format!("{SESSION_MARKER_PREFIX}{}{SESSION_MARKER_SUFFIX}", session_id.trim())
}

fn phase_label(phase: &str) -> &str {
    let trimmed = phase.trim();
    if trimmed.is_empty() {
        "Agent"
    } else {
        trimmed
    }
}

fn outcome_headline(outcome: &str) -> &'static str {
    match outcome {
        "finished" => "finished",
        "needs_attention" => "needs attention",
        "stopped" => "stopped",
        "timed_out" => "timed out",
        "cancelled" => "cancelled",
        _ => "reported",
    }
}

fn render_field(key: &str, value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let mut rendered = format!("- {key}:\n");
            for item in items {
                rendered.push_str(&format!("  - {}\n", render_scalar(item)));
            }
            rendered
        }
        other => format!("- {key}: {}\n", render_scalar(other)),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}
