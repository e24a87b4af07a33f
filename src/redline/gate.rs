//! Quality gate
//!
//! A fixed set of independent rules over each edit's replacement text. Each rule
//! is a plain function returning zero or more issues, so rules can be added or
//! removed without touching the others. `error` findings block acceptance and
//! drive the retry; `warning` findings are surfaced and passed through.
//!
//! Anchors are re-checked here against the original source, before anything is
//! applied, so that anchor problems can feed the retry prompt.

use super::anchor::{count_occurrences, resolve_span, ResolutionFailure, Span};
use super::{Edit, EditOperation, IssueKind, QualityIssue, SelfCheck, Severity};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Phrases that confine a duty to the party's own fault.
pub const FAULT_LIMITING_PHRASES: &[&str] = &[
    "to the extent caused by",
    "to the extent arising from",
    "but only to the extent",
];

/// Phrases that extend a duty to any cause whatsoever.
pub const BROAD_CAUSATION_PHRASES: &[&str] = &[
    "however caused",
    "arising out of",
    "in any way connected with",
    "resulting from",
    "regardless of cause",
];

const EVIDENCE_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateConfig {
    /// Treat an `anchor_start` that occurs more than once as an error instead of a warning.
    pub strict_anchors: bool,
}

/// Retry iff at least one finding is an error.
pub fn should_retry(issues: &[QualityIssue]) -> bool {
    issues.iter().any(QualityIssue::is_error)
}

/// Run every rule over every edit, then the cross-edit and self-check rules.
///
/// Output is in insertion order: per edit, then overlaps, then self-check
/// discrepancies. No deduplication across edits.
pub fn validate(
    edits: &[Edit],
    source: &str,
    self_check: Option<&SelfCheck>,
    config: GateConfig,
) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    for edit in edits {
        let section = edit.section.as_str();
        let rule_output = [
            check_edit_completeness(edit),
            check_duplicate_sentence_starts(&edit.new_text),
            check_anchors(edit, source, config),
            check_duplicate_definitions(&edit.new_text),
            check_dangling_conjunctions(&edit.new_text),
            check_incomplete_sentence(&edit.new_text),
            check_causation_contradiction(&edit.new_text),
            check_party_symmetry(&edit.new_text),
        ];
        issues.extend(
            rule_output
                .into_iter()
                .flatten()
                .map(|issue| issue.with_section(section)),
        );
    }

    issues.extend(check_overlapping_spans(edits, source));

    if let Some(check) = self_check {
        let found = cross_check_self_report(check, &issues);
        issues.extend(found);
    }

    issues
}

fn evidence(text: &str) -> String {
    crate::util::truncate(&crate::util::one_line(text), EVIDENCE_MAX_CHARS)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Per-edit rules
// ─────────────────────────────────────────────────────────────────────────────

fn check_edit_completeness(edit: &Edit) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    if edit.operation != EditOperation::ReplaceBlock {
        issues.push(QualityIssue::error(
            IssueKind::IncompleteEdit,
            "Unsupported operation; every edit must be a replace_block",
        ));
    }
    let missing = edit.missing_fields();
    if !missing.is_empty() {
        issues.push(QualityIssue::error(
            IssueKind::IncompleteEdit,
            format!("Edit is missing required field(s): {}", missing.join(", ")),
        ));
    }
    issues
}

fn sentence_opening_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Z][\w'-]*(?:[ \t]+[\w'-]+){0,2}").expect("valid sentence opening regex")
    })
}

fn sentence_break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("valid sentence break regex"))
}

/// Opening phrase of each sentence: a capitalized word and the two words after it,
/// whatever their case.
///
/// The window is fixed at three words. Counting only lowercase followers would
/// cut "The Contractor covenants" down to "the", so capitalized party names stay
/// inside the window. Sentences that agree on three words and differ on the
/// fourth therefore count as duplicates.
fn sentence_openings(text: &str) -> Vec<String> {
    sentence_break_regex()
        .split(text)
        .filter_map(|sentence| {
            sentence_opening_regex()
                .find(sentence.trim_start())
                .map(|m| m.as_str().to_lowercase())
        })
        .collect()
}

pub fn check_duplicate_sentence_starts(new_text: &str) -> Vec<QualityIssue> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for opening in sentence_openings(new_text) {
        let count = seen.entry(opening.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicates.push(opening);
        }
    }

    duplicates
        .into_iter()
        .map(|opening| {
            QualityIssue::error(
                IssueKind::DuplicateSentenceStart,
                format!("Two sentences open with \"{}\"", opening),
            )
            .with_evidence(opening)
        })
        .collect()
}

pub fn check_anchors(edit: &Edit, source: &str, config: GateConfig) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    if !edit.anchor_start.is_empty() {
        match count_occurrences(source, &edit.anchor_start) {
            0 => issues.push(
                QualityIssue::error(
                    IssueKind::AnchorNotFound,
                    "anchor_start does not occur in the source document",
                )
                .with_evidence(evidence(&edit.anchor_start)),
            ),
            1 => {}
            n => {
                let description = format!(
                    "anchor_start occurs {} times; the first occurrence will be edited",
                    n
                );
                let issue = if config.strict_anchors {
                    QualityIssue::error(IssueKind::AmbiguousAnchor, description)
                } else {
                    QualityIssue::warning(IssueKind::AmbiguousAnchor, description)
                };
                issues.push(issue.with_evidence(evidence(&edit.anchor_start)));
            }
        }
    }

    if !edit.anchor_end.is_empty() && count_occurrences(source, &edit.anchor_end) == 0 {
        issues.push(
            QualityIssue::error(
                IssueKind::AnchorNotFound,
                "anchor_end does not occur in the source document",
            )
            .with_evidence(evidence(&edit.anchor_end)),
        );
    }

    // Both anchors exist, but the end anchor only appears before the start anchor.
    if issues.iter().all(|issue| issue.kind != IssueKind::AnchorNotFound)
        && !edit.anchor_start.is_empty()
        && !edit.anchor_end.is_empty()
        && resolve_span(source, &edit.anchor_start, &edit.anchor_end)
            == Err(ResolutionFailure::EndNotFound)
    {
        issues.push(
            QualityIssue::error(
                IssueKind::AnchorNotFound,
                "anchor_end does not occur after anchor_start in the source document",
            )
            .with_evidence(evidence(&edit.anchor_end)),
        );
    }

    issues
}

fn defined_term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\(\s*collectively\s*,?\s*"[^"]+"[^)]*\)"#)
            .expect("valid defined term regex")
    })
}

pub fn check_duplicate_definitions(new_text: &str) -> Vec<QualityIssue> {
    let definitions: Vec<&str> = defined_term_regex()
        .find_iter(new_text)
        .map(|m| m.as_str())
        .collect();
    if definitions.len() <= 1 {
        return Vec::new();
    }
    vec![QualityIssue::error(
        IssueKind::DuplicateDefinition,
        format!(
            "{} defined-term parentheticals in one block; define a term at most once",
            definitions.len()
        ),
    )
    .with_evidence(evidence(&definitions.join(" ... ")))]
}

fn paragraph_break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph break regex"))
}

fn leading_conjunction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(and|or|but)\s").expect("valid conjunction regex"))
}

pub fn check_dangling_conjunctions(new_text: &str) -> Vec<QualityIssue> {
    paragraph_break_regex()
        .split(new_text)
        .filter_map(|paragraph| {
            let paragraph = paragraph.trim_start();
            leading_conjunction_regex().find(paragraph).map(|m| {
                QualityIssue::error(
                    IssueKind::ParagraphStartsWithConjunction,
                    "Paragraph begins with a bare conjunction; the sentence it continues was cut",
                )
                .with_evidence(m.as_str().trim_end().to_string())
            })
        })
        .collect()
}

pub fn check_incomplete_sentence(new_text: &str) -> Vec<QualityIssue> {
    let trimmed = new_text.trim();
    if trimmed.is_empty() || trimmed.ends_with(['.', '"', ')']) {
        return Vec::new();
    }
    let tail: String = {
        let chars: Vec<char> = trimmed.chars().collect();
        chars[chars.len().saturating_sub(40)..].iter().collect()
    };
    vec![QualityIssue::warning(
        IssueKind::IncompleteSentence,
        "Replacement text does not end with terminal punctuation; it may be truncated",
    )
    .with_evidence(tail)]
}

pub fn check_causation_contradiction(new_text: &str) -> Vec<QualityIssue> {
    let lower = new_text.to_lowercase();
    let Some(limiting) = FAULT_LIMITING_PHRASES
        .iter()
        .find(|phrase| lower.contains(*phrase))
    else {
        return Vec::new();
    };

    BROAD_CAUSATION_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .map(|phrase| {
            QualityIssue::error(
                IssueKind::ContradictoryModifiers,
                format!(
                    "Fault-limited scope (\"{}\") conflicts with broad causation language (\"{}\")",
                    limiting, phrase
                ),
            )
            .with_evidence(phrase.to_string())
        })
        .collect()
}

fn third_party_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)third[\s-]+party\s+claims").expect("valid third-party regex"))
}

fn first_party_claims_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bclaims?\b[^.;]{0,60}?\bby\s+(?:the\s+)?(?:FW|Client|County)\b")
            .expect("valid first-party claims regex")
    })
}

pub fn check_party_symmetry(new_text: &str) -> Vec<QualityIssue> {
    if !third_party_regex().is_match(new_text) {
        return Vec::new();
    }
    first_party_claims_regex()
        .find(new_text)
        .map(|m| {
            QualityIssue::warning(
                IssueKind::ScopeInconsistency,
                "Scope is limited to third-party claims but also covers claims brought by a contracting party",
            )
            .with_evidence(evidence(m.as_str()))
        })
        .into_iter()
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
//  Cross-edit rules
// ─────────────────────────────────────────────────────────────────────────────

/// Edits whose spans in the original source overlap cannot both be applied sanely.
fn check_overlapping_spans(edits: &[Edit], source: &str) -> Vec<QualityIssue> {
    let spans: Vec<(usize, Span)> = edits
        .iter()
        .enumerate()
        .filter_map(|(i, edit)| {
            resolve_span(source, &edit.anchor_start, &edit.anchor_end)
                .ok()
                .map(|span| (i, span))
        })
        .collect();

    let mut issues = Vec::new();
    for (pos, (i, a)) in spans.iter().enumerate() {
        for (j, b) in spans.iter().skip(pos + 1) {
            if a.overlaps(b) {
                issues.push(
                    QualityIssue::error(
                        IssueKind::OverlappingEdits,
                        format!(
                            "Edit {} ({}) and edit {} ({}) replace overlapping text",
                            i + 1,
                            edits[*i].label(),
                            j + 1,
                            edits[*j].label()
                        ),
                    )
                    .with_section(edits[*j].section.as_str())
                    .with_evidence(evidence(&source[b.start.max(a.start)..b.end.min(a.end)])),
                );
            }
        }
    }
    issues
}

/// Self-reported failures the mechanical rules did not catch.
fn cross_check_self_report(check: &SelfCheck, issues: &[QualityIssue]) -> Vec<QualityIssue> {
    let caught = |kind: IssueKind| issues.iter().any(|issue| issue.kind == kind);
    let mut found = Vec::new();

    if !check.no_duplicate_sentence_starts && !caught(IssueKind::DuplicateSentenceStart) {
        found.push(QualityIssue::warning(
            IssueKind::SelfCheckDiscrepancy,
            "Generator reported duplicate sentence starts that the mechanical checks did not find",
        ));
    }
    if !check.no_contradictory_modifiers && !caught(IssueKind::ContradictoryModifiers) {
        found.push(QualityIssue::warning(
            IssueKind::SelfCheckDiscrepancy,
            "Generator reported contradictory modifiers that the mechanical checks did not find",
        ));
    }

    found
}

/// Count of findings at each severity, for log lines.
pub fn severity_counts(issues: &[QualityIssue]) -> (usize, usize) {
    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    (errors, issues.len() - errors)
}
