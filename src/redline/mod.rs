//! Redlining core
//!
//! Everything in here is synchronous and pure: normalize text, resolve anchors,
//! apply block replacements, gate the replacement prose, and render the redline.
//! The generation call that produces edits lives in `crate::llm`.

pub mod anchor;
pub mod apply;
pub mod diff;
pub mod gate;
pub mod normalize;
pub mod revisions;

pub use anchor::{count_occurrences, resolve_span, ResolutionFailure, Span};
pub use apply::{apply_edits, ApplyReport, EditOutcome};
pub use diff::{diff_chunks, render_diff, ChunkTag, DiffChunk, DiffMarkers};
pub use gate::{should_retry, validate, GateConfig};
pub use normalize::normalize;
pub use revisions::{extract_revisions, Revision};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The only edit shape the generator may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    /// Replace everything from the start of `anchor_start` to the end of `anchor_end`.
    #[default]
    ReplaceBlock,
    /// Anything else the generator invented. Never applied.
    #[serde(other)]
    Unsupported,
}

/// A proposed block replacement.
///
/// Fields default to empty so that a partially-formed edit from the generator
/// still parses; the applicator and the gate report the missing pieces.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Edit {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub operation: EditOperation,
    #[serde(default)]
    pub anchor_start: String,
    #[serde(default)]
    pub anchor_end: String,
    #[serde(default)]
    pub new_text: String,
}

impl Edit {
    pub fn replace_block(
        section: impl Into<String>,
        anchor_start: impl Into<String>,
        anchor_end: impl Into<String>,
        new_text: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            operation: EditOperation::ReplaceBlock,
            anchor_start: anchor_start.into(),
            anchor_end: anchor_end.into(),
            new_text: new_text.into(),
        }
    }

    /// Label used in failure reports; falls back to the start anchor.
    pub fn label(&self) -> String {
        if !self.section.trim().is_empty() {
            self.section.trim().to_string()
        } else if !self.anchor_start.is_empty() {
            format!("\"{}\"", crate::util::truncate(&self.anchor_start, 40))
        } else {
            "(unlabeled edit)".to_string()
        }
    }

    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.anchor_start.is_empty() {
            missing.push("anchor_start");
        }
        if self.anchor_end.is_empty() {
            missing.push("anchor_end");
        }
        if self.new_text.trim().is_empty() {
            missing.push("new_text");
        }
        missing
    }

    /// Copy with anchors and replacement text run through the normalizer.
    pub fn normalized(&self) -> Self {
        Self {
            section: self.section.clone(),
            operation: self.operation,
            anchor_start: normalize(&self.anchor_start),
            anchor_end: normalize(&self.anchor_end),
            new_text: normalize(&self.new_text),
        }
    }
}

/// The generator's own assessment of its output. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfCheck {
    #[serde(default = "default_true")]
    pub no_duplicate_sentence_starts: bool,
    #[serde(default = "default_true")]
    pub no_orphaned_fragments: bool,
    #[serde(default = "default_true")]
    pub no_duplicate_definitions: bool,
    #[serde(default = "default_true")]
    pub no_contradictory_modifiers: bool,
    #[serde(default = "default_true")]
    pub no_paragraph_starts_with_and: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SelfCheck {
    fn default() -> Self {
        Self {
            no_duplicate_sentence_starts: true,
            no_orphaned_fragments: true,
            no_duplicate_definitions: true,
            no_contradictory_modifiers: true,
            no_paragraph_starts_with_and: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Defect classes the quality gate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateSentenceStart,
    AnchorNotFound,
    AmbiguousAnchor,
    DuplicateDefinition,
    ParagraphStartsWithConjunction,
    IncompleteSentence,
    ContradictoryModifiers,
    ScopeInconsistency,
    SelfCheckDiscrepancy,
    IncompleteEdit,
    OverlappingEdits,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::DuplicateSentenceStart => "duplicate_sentence_start",
            IssueKind::AnchorNotFound => "anchor_not_found",
            IssueKind::AmbiguousAnchor => "ambiguous_anchor",
            IssueKind::DuplicateDefinition => "duplicate_definition",
            IssueKind::ParagraphStartsWithConjunction => "paragraph_starts_with_conjunction",
            IssueKind::IncompleteSentence => "incomplete_sentence",
            IssueKind::ContradictoryModifiers => "contradictory_modifiers",
            IssueKind::ScopeInconsistency => "scope_inconsistency",
            IssueKind::SelfCheckDiscrepancy => "self_check_discrepancy",
            IssueKind::IncompleteEdit => "incomplete_edit",
            IssueKind::OverlappingEdits => "overlapping_edits",
        }
    }
}

/// One finding from the quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl QualityIssue {
    pub fn error(kind: IssueKind, description: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, description)
    }

    pub fn warning(kind: IssueKind, description: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, description)
    }

    fn new(kind: IssueKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            section: None,
            evidence: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        let section = section.into();
        if !section.trim().is_empty() {
            self.section = Some(section);
        }
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity.label(), self.kind.as_str())?;
        if let Some(section) = &self.section {
            write!(f, " in {}", section)?;
        }
        write!(f, ": {}", self.description)?;
        if let Some(evidence) = &self.evidence {
            write!(f, " (evidence: \"{}\")", crate::util::truncate(evidence, 120))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_deserializes_with_missing_fields() {
        let edit: Edit = serde_json::from_str(r#"{"anchor_start":"A."}"#).unwrap();
        assert_eq!(edit.operation, EditOperation::ReplaceBlock);
        assert_eq!(edit.missing_fields(), vec!["anchor_end", "new_text"]);
    }

    #[test]
    fn test_unknown_operation_is_unsupported() {
        let edit: Edit =
            serde_json::from_str(r#"{"operation":"delete_words","anchor_start":"A"}"#).unwrap();
        assert_eq!(edit.operation, EditOperation::Unsupported);
    }

    #[test]
    fn test_self_check_missing_flags_default_to_pass() {
        let check: SelfCheck =
            serde_json::from_str(r#"{"no_contradictory_modifiers": false}"#).unwrap();
        assert!(!check.no_contradictory_modifiers);
        assert!(check.no_duplicate_sentence_starts);
    }

    #[test]
    fn test_issue_display_includes_section_and_evidence() {
        let issue = QualityIssue::error(IssueKind::DuplicateDefinition, "term defined twice")
            .with_section("Indemnity")
            .with_evidence("(collectively \"Claims\")");
        let text = issue.to_string();
        assert!(text.starts_with("[error] duplicate_definition in Indemnity"));
        assert!(text.contains("collectively"));
    }

    #[test]
    fn test_issue_serializes_type_key() {
        let issue = QualityIssue::warning(IssueKind::IncompleteSentence, "no terminal punctuation");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "incomplete_sentence");
        assert_eq!(json["severity"], "warning");
        assert!(json.get("section").is_none());
    }

    #[test]
    fn test_edit_label_fallbacks() {
        let mut edit = Edit::replace_block("", "Payment terms.", "days.", "x.");
        assert_eq!(edit.label(), "\"Payment terms.\"");
        edit.anchor_start.clear();
        assert_eq!(edit.label(), "(unlabeled edit)");
    }
}
