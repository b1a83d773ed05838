//! Verdicts built from model payloads (fresh or cached).
use crate::rows::SourceRow;
use serde_json::{Map, Value};

/// Audit outcome for one source row.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub row_number: usize,
    pub source_link: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub rewrite_suggestion: String,
    pub raw_payload: Map<String, Value>,
}

impl Verdict {
    /// Issues rendered as a newline-joined bullet list.
    pub fn issues_text(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("- {issue}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Build a verdict from a payload, applying the allowed-status constraint.
pub fn build_verdict(
    row: &SourceRow,
    payload: &Map<String, Value>,
    allowed_statuses: &[String],
    source_link: String,
) -> Verdict {
    let mut issues = match payload.get("issues") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(value_text)
            .filter(|item| !item.trim().is_empty())
            .collect(),
        Some(other) => vec![other.to_string()],
    };

    let rewrite_suggestion = match payload.get("rewrite_suggestion") {
        None | Some(Value::Null) => String::new(),
        Some(value) => value_text(value),
    };

    let mut is_valid = payload
        .get("is_valid")
        .map(truthy)
        .unwrap_or(false);

    let status_allowed =
        allowed_statuses.is_empty() || allowed_statuses.iter().any(|s| *s == row.status_text);
    if !status_allowed {
        let note = format!(
            "Status value '{}' is outside the allowed list: {}",
            row.status_text,
            allowed_statuses.join(", ")
        );
        if !issues.contains(&note) {
            issues.push(note);
        }
        is_valid = false;
    }

    Verdict {
        row_number: row.row_number,
        source_link,
        is_valid,
        issues,
        rewrite_suggestion,
        raw_payload: payload.clone(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}
