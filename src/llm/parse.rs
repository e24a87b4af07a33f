//! Generator output parsing
//!
//! The generator is asked for bare JSON but does not always comply: it may
//! wrap the object in a Markdown fence, add a sentence before or after it, or
//! emit raw newlines inside string values. Parsing tolerates exactly those
//! three things and nothing more.

use crate::error::{ReviewError, Result};
use crate::redline::{Edit, EditOperation, SelfCheck};
use crate::util::truncate_str;
use serde_json::Value;
use tracing::{debug, warn};

/// One parsed generation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationResult {
    pub edits: Vec<Edit>,
    pub self_check: Option<SelfCheck>,
    /// The generator's own refusal, if it declined to edit.
    pub error: Option<String>,
    /// Unparsed response text, kept for diagnostics.
    pub raw: String,
}

impl GenerationResult {
    pub fn is_refusal(&self) -> bool {
        self.error.is_some()
    }
}

/// Strip a Markdown code fence (with or without a language tag).
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open.trim_start_matches("json"),
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Escape literal tab, carriage return and newline characters that appear
/// inside JSON string literals. Whitespace between tokens is left alone.
fn escape_control_chars_in_strings(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for ch in json.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
        } else {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }

    out
}

/// Parse raw generator output into a [`GenerationResult`].
///
/// A top-level `error` field is a valid, empty result (the generator declined),
/// not a parse failure.
pub fn parse_generation(raw: &str) -> Result<GenerationResult> {
    let unfenced = strip_markdown_fences(raw);
    let json_str = extract_json_object(unfenced).ok_or_else(|| {
        ReviewError::Parse(format!(
            "no JSON object in response: {:?}",
            truncate_str(raw.trim(), 200)
        ))
    })?;

    let value: Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(initial_error) => {
            debug!(error = %initial_error, "direct JSON parse failed, trying repair pass");
            let repaired = escape_control_chars_in_strings(json_str);
            serde_json::from_str(&repaired).map_err(|e| {
                ReviewError::Parse(format!(
                    "invalid JSON after repair: {} (first error: {})",
                    e, initial_error
                ))
            })?
        }
    };

    interpret(value, raw)
}

fn interpret(value: Value, raw: &str) -> Result<GenerationResult> {
    let Value::Object(object) = value else {
        return Err(ReviewError::Parse("top-level JSON value is not an object".to_string()));
    };

    let error = match object.get("error") {
        Some(Value::String(reason)) if !reason.trim().is_empty() => Some(reason.trim().to_string()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    let edits = match object.get("edits") {
        Some(Value::Array(items)) => items.iter().map(edit_from_value).collect(),
        Some(Value::Null) | None if error.is_some() => Vec::new(),
        Some(Value::Null) | None => {
            return Err(ReviewError::Parse("response has no \"edits\" array".to_string()));
        }
        Some(other) => {
            return Err(ReviewError::Parse(format!(
                "\"edits\" must be an array, got {}",
                json_type_name(other)
            )));
        }
    };

    let self_check = match object.get("self_check") {
        Some(check @ Value::Object(_)) => match serde_json::from_value::<SelfCheck>(check.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(error = %e, "ignoring malformed self_check");
                None
            }
        },
        _ => None,
    };

    Ok(GenerationResult {
        edits,
        self_check,
        error,
        raw: raw.to_string(),
    })
}

/// Build an edit from whatever the generator put in the array. Anything that
/// is not a string field is treated as missing, so the edit is reported as
/// incomplete rather than silently dropped.
fn edit_from_value(value: &Value) -> Edit {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let operation = match value.get("operation").and_then(Value::as_str) {
        None | Some("replace_block") => EditOperation::ReplaceBlock,
        Some(_) => EditOperation::Unsupported,
    };

    Edit {
        section: field("section"),
        operation,
        anchor_start: field("anchor_start"),
        anchor_end: field("anchor_end"),
        new_text: field("new_text"),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
