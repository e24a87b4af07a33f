//! Edit application
//!
//! Edits are applied in the order the generator listed them. Each edit is
//! resolved against the document as it stands after the previous edits, so
//! shifted offsets never go stale. Bad edits are reported, never fatal.

use super::anchor::{count_occurrences, resolve_span, Span};
use super::{Edit, EditOperation};
use serde::Serialize;
use tracing::{debug, warn};

/// What happened to one edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied {
        section: String,
        /// Byte offsets in the document as it was when this edit ran.
        start: usize,
        end: usize,
        /// The text that was replaced, for audit and display.
        replaced: String,
        /// `anchor_start` occurred more than once; the first occurrence was used.
        ambiguous: bool,
    },
    Failed {
        section: String,
        reason: String,
    },
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied { .. })
    }
}

/// Final document plus a record per edit, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub document: String,
    pub applied: usize,
    /// Labels of edits that could not be applied, with the reason.
    pub failures: Vec<String>,
    pub outcomes: Vec<EditOutcome>,
}

/// Apply `edits` to `document` left to right.
///
/// Deterministic for a given document and edit list.
pub fn apply_edits(document: &str, edits: &[Edit]) -> ApplyReport {
    let initial = ApplyReport {
        document: document.to_string(),
        applied: 0,
        failures: Vec::new(),
        outcomes: Vec::with_capacity(edits.len()),
    };

    edits.iter().fold(initial, |report, edit| apply_one(report, edit))
}

fn apply_one(mut report: ApplyReport, edit: &Edit) -> ApplyReport {
    let section = edit.label();

    if edit.operation != EditOperation::ReplaceBlock {
        return record_failure(report, section, "unsupported operation".to_string());
    }

    let missing = edit.missing_fields();
    if !missing.is_empty() {
        return record_failure(report, section, format!("missing {}", missing.join(", ")));
    }

    let span = match resolve_span(&report.document, &edit.anchor_start, &edit.anchor_end) {
        Ok(span) => span,
        Err(failure) => return record_failure(report, section, failure.to_string()),
    };

    let ambiguous = count_occurrences(&report.document, &edit.anchor_start) > 1;
    let replaced = report.document[span.start..span.end].to_string();
    report.document = splice(&report.document, span, &edit.new_text);
    report.applied += 1;
    debug!(
        section = %section,
        start = span.start,
        end = span.end,
        ambiguous,
        "applied block replacement"
    );
    report.outcomes.push(EditOutcome::Applied {
        section,
        start: span.start,
        end: span.end,
        replaced,
        ambiguous,
    });
    report
}

fn record_failure(mut report: ApplyReport, section: String, reason: String) -> ApplyReport {
    warn!(section = %section, reason = %reason, "edit not applied");
    report.failures.push(format!("{}: {}", section, reason));
    report.outcomes.push(EditOutcome::Failed { section, reason });
    report
}

fn splice(document: &str, span: Span, replacement: &str) -> String {
    let mut out = String::with_capacity(document.len() - span.len() + replacement.len());
    out.push_str(&document[..span.start]);
    out.push_str(replacement);
    out.push_str(&document[span.end..]);
    out
}
