use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::session::SessionPhase;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("structured output must be a JSON object")]
    NotAnObject,
    #[error("required field '{field}' is missing or null")]
    MissingField { field: String },
    #[error("field '{field}' must be {expected}")]
    WrongKind {
        field: String,
        expected: &'static str,
    },
    #[error("field '{field}' value {value} is outside the allowed range")]
    OutOfRange { field: String, value: String },
    #[error("field '{field}' value '{value}' is not one of {allowed}")]
    UnknownToken {
        field: String,
        value: String,
        allowed: String,
    },
    #[error("field '{field}' has {count} items, at most {max} allowed")]
    TooManyItems {
        field: String,
        count: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    /// Enumerated token; matched case-insensitively and normalized to the listed spelling.
    Token(Vec<&'static str>),
    Number { min: Option<f64>, max: Option<f64> },
    Integer { min: Option<i64> },
    Boolean,
    StringList { max_items: Option<usize> },
}

impl FieldKind {
    /// Short human-readable rule, used in launch prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Text => "text".to_string(),
            Self::Token(allowed) => format!("one of {}", allowed.join("|")),
            Self::Number { min, max } => match (min, max) {
                (Some(min), Some(max)) => format!("number between {min} and {max}"),
                (Some(min), None) => format!("number >= {min}"),
                (None, Some(max)) => format!("number <= {max}"),
                (None, None) => "number".to_string(),
            },
            Self::Integer { min: Some(min) } => format!("integer >= {min}"),
            Self::Integer { min: None } => "integer".to_string(),
            Self::Boolean => "true or false".to_string(),
            Self::StringList {
                max_items: Some(max),
            } => format!("list of at most {max} strings"),
            Self::StringList { max_items: None } => "list of strings".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Example value shown to the agent in the launch prompt.
    pub example: Value,
}

impl FieldSpec {
    pub fn required(name: &'static str, kind: FieldKind, example: Value) -> Self {
        Self {
            name,
            kind,
            required: true,
            example,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind, example: Value) -> Self {
        Self {
            name,
            kind,
            required: false,
            example,
        }
    }
}

/// Ordered description of the fields an agent must report.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn scoping() -> Self {
        Self {
            name: "scoping",
            fields: vec![
                FieldSpec::optional(
                    "summary",
                    FieldKind::Text,
                    Value::from("Brief summary of what needs to be done"),
                ),
                FieldSpec::optional(
                    "plan",
                    FieldKind::StringList {
                        max_items: Some(20),
                    },
                    Value::from(vec!["Step 1", "Step 2", "Step 3"]),
                ),
                FieldSpec::required(
                    "risk_level",
                    FieldKind::Token(vec!["low", "medium", "high"]),
                    Value::from("medium"),
                ),
                FieldSpec::optional(
                    "est_effort_hours",
                    FieldKind::Number {
                        min: Some(0.0),
                        max: None,
                    },
                    Value::from(8.0),
                ),
                FieldSpec::required(
                    "confidence",
                    FieldKind::Number {
                        min: Some(0.0),
                        max: Some(1.0),
                    },
                    Value::from(0.75),
                ),
            ],
        }
    }

    pub fn execution() -> Self {
        Self {
            name: "execution",
            fields: vec![
                FieldSpec::required(
                    "status",
                    FieldKind::Token(vec!["planning", "coding", "testing", "done"]),
                    Value::from("planning"),
                ),
                FieldSpec::optional(
                    "branch",
                    FieldKind::Text,
                    Value::from("feature-branch-name"),
                ),
                FieldSpec::optional("pr_url", FieldKind::Text, Value::Null),
                FieldSpec::optional(
                    "tests_passed",
                    FieldKind::Integer { min: Some(0) },
                    Value::from(0),
                ),
                FieldSpec::optional(
                    "tests_failed",
                    FieldKind::Integer { min: Some(0) },
                    Value::from(0),
                ),
            ],
        }
    }

    pub fn for_phase(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Scoping => Self::scoping(),
            SessionPhase::Executing => Self::execution(),
        }
    }

    /// Compact single-line example object with fields in declaration order.
    pub fn example_json(&self) -> String {
        let entries = self
            .fields
            .iter()
            .map(|field| {
                format!(
                    "{}:{}",
                    Value::from(field.name),
                    serde_json::to_string(&field.example).unwrap_or_else(|_| "null".to_string())
                )
            })
            .collect::<Vec<_>>();
        format!("{{{}}}", entries.join(","))
    }

    /// Validates `value` and returns the normalized payload: known fields
    /// only, tokens canonicalized, numeric and boolean strings converted.
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>, SchemaError> {
        let object = value.as_object().ok_or(SchemaError::NotAnObject)?;
        let mut normalized = Map::new();
        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            field: field.name.to_string(),
                        });
                    }
                }
                Some(raw) => {
                    normalized.insert(field.name.to_string(), normalize_field(field, raw)?);
                }
            }
        }
        Ok(normalized)
    }
}

fn normalize_field(field: &FieldSpec, raw: &Value) -> Result<Value, SchemaError> {
    let wrong_kind = |expected: &'static str| SchemaError::WrongKind {
        field: field.name.to_string(),
        expected,
    };
    match &field.kind {
        FieldKind::Text => match raw {
            Value::String(text) => Ok(Value::String(text.clone())),
            _ => Err(wrong_kind("a string")),
        },
        FieldKind::Token(allowed) => {
            let text = raw.as_str().ok_or_else(|| wrong_kind("a string token"))?;
            let candidate = text.trim();
            allowed
                .iter()
                .find(|token| token.eq_ignore_ascii_case(candidate))
                .map(|token| Value::from(*token))
                .ok_or_else(|| SchemaError::UnknownToken {
                    field: field.name.to_string(),
                    value: text.to_string(),
                    allowed: allowed.join("|"),
                })
        }
        FieldKind::Number { min, max } => {
            let number = match raw {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|number| number.is_finite())
            .ok_or_else(|| wrong_kind("a number"))?;
            let below = min.is_some_and(|min| number < min);
            let above = max.is_some_and(|max| number > max);
            if below || above {
                return Err(SchemaError::OutOfRange {
                    field: field.name.to_string(),
                    value: number.to_string(),
                });
            }
            match raw {
                Value::Number(number) => Ok(Value::Number(number.clone())),
                _ => Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| wrong_kind("a number")),
            }
        }
        FieldKind::Integer { min } => {
            let integer = match raw {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| wrong_kind("an integer"))?;
            if min.is_some_and(|min| integer < min) {
                return Err(SchemaError::OutOfRange {
                    field: field.name.to_string(),
                    value: integer.to_string(),
                });
            }
            Ok(Value::from(integer))
        }
        FieldKind::Boolean => match raw {
            Value::Bool(flag) => Ok(Value::Bool(*flag)),
            Value::String(text) if text.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(text) if text.trim().eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            _ => Err(wrong_kind("a boolean")),
        },
        FieldKind::StringList { max_items } => {
            let items = raw
                .as_array()
                .ok_or_else(|| wrong_kind("a list of strings"))?;
            if let Some(max) = max_items {
                if items.len() > *max {
                    return Err(SchemaError::TooManyItems {
                        field: field.name.to_string(),
                        count: items.len(),
                        max: *max,
                    });
                }
            }
            let strings = items
                .iter()
                .map(|item| item.as_str().map(|text| Value::from(text.to_string())))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| wrong_kind("a list of strings"))?;
            Ok(Value::Array(strings))
        }
    }
}

/// Typed view of a validated scoping payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopingReport {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub plan: Vec<String>,
    pub risk_level: String,
    #[serde(default)]
    pub est_effort_hours: Option<f64>,
    pub confidence: f64,
}

impl ScopingReport {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }
}

/// Typed view of a validated execution payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub tests_passed: Option<u64>,
    #[serde(default)]
    pub tests_failed: Option<u64>,
}

impl ExecutionReport {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }

    pub fn is_complete(&self) -> bool {
        self.status == "done" && self.pr_url.is_some()
    }
}
