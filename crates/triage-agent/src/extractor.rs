use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::OutputSchema;
use crate::session::Session;

/// Where a validated result was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    /// The session's dedicated structured-output channel.
    Direct,
    /// Parsed from the message at `message_index` in the session's message list.
    Fallback { message_index: usize },
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fallback { .. } => "fallback",
        }
    }

    pub fn message_index(self) -> Option<usize> {
        match self {
            Self::Direct => None,
            Self::Fallback { message_index } => Some(message_index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedResult {
    pub payload: Map<String, Value>,
    pub provenance: Provenance,
}

impl ExtractedResult {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.field("confidence").and_then(Value::as_f64)
    }
}

/// Recovers a validated result from a session snapshot: the dedicated
/// output first, then agent messages newest first. `None` is a normal
/// outcome, not an error.
pub fn extract(session: &Session, schema: &OutputSchema) -> Option<ExtractedResult> {
    if let Some(output) = session.structured_output.as_ref() {
        match schema.validate(output) {
            Ok(payload) => {
                return Some(ExtractedResult {
                    payload,
                    provenance: Provenance::Direct,
                });
            }
            Err(error) => {
                debug!(
                    session_id = %session.id,
                    schema = schema.name,
                    error = %error,
                    "structured output did not validate; scanning messages"
                );
            }
        }
    }

    for (message_index, message) in session.messages.iter().enumerate().rev() {
        if !message.is_agent_authored() {
            continue;
        }
        if let Some(payload) = extract_from_text(&message.message, schema) {
            return Some(ExtractedResult {
                payload,
                provenance: Provenance::Fallback { message_index },
            });
        }
    }
    None
}

/// First validating JSON object in `text`: fenced blocks, then bare
/// objects, then the whole message, each newest first.
pub fn extract_from_text(text: &str, schema: &OutputSchema) -> Option<Map<String, Value>> {
    candidate_objects(text)
        .into_iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter(Value::is_object)
        .find_map(|value| schema.validate(&value).ok())
}

/// Last agent message with fenced blocks removed, for display when no
/// structured result exists.
pub fn text_summary(session: &Session) -> Option<String> {
    let message = session
        .messages
        .iter()
        .rev()
        .find(|message| message.is_agent_authored())?;
    let cleaned = match fence_pattern() {
        Some(pattern) => pattern.replace_all(&message.message, "").into_owned(),
        None => message.message.clone(),
    };
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn candidate_objects(text: &str) -> Vec<&str> {
    let mut candidates = fence_pattern()
        .map(|pattern| {
            pattern
                .captures_iter(text)
                .filter_map(|captures| captures.get(1))
                .map(|body| body.as_str().trim())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    candidates.reverse();

    let mut bare = balanced_object_spans(text)
        .into_iter()
        .map(|(start, end)| &text[start..end])
        .collect::<Vec<_>>();
    bare.reverse();
    candidates.extend(bare);

    let whole = text.trim();
    if !whole.is_empty() {
        candidates.push(whole);
    }
    candidates
}

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").ok())
        .as_ref()
}

/// Byte ranges of top-level balanced `{...}` spans. Braces inside JSON
/// strings are ignored; an unclosed brace is skipped.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        if bytes[cursor] != b'{' {
            cursor += 1;
            continue;
        }
        match matching_close(bytes, cursor) {
            Some(end) => {
                spans.push((cursor, end + 1));
                cursor = end + 1;
            }
            None => cursor += 1,
        }
    }
    spans
}

fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
