use crate::redline::{QualityIssue, Severity};

/// Hard drafting rules. Sent verbatim in the system prompt and restated in
/// every retry prompt.
pub const HARD_RULES: &str = r#"HARD RULES (violating any of these invalidates your output):
1. FULL-BLOCK REPLACEMENT ONLY. "new_text" replaces everything from the first character of "anchor_start" through the last character of "anchor_end". Rewrite the whole block; never leave fragments of the old text behind and never perform partial deletes.
2. NO DUPLICATE SENTENCE OPENINGS. No two sentences in a block may begin with the same opening words (e.g. two sentences starting "The Contractor shall").
3. DEFINED TERMS ONCE. A defined-term parenthetical such as (collectively "Claims") may appear at most once per section.
4. NO CONTRADICTORY SCOPE. Whenever you introduce a fault-limiting phrase ("to the extent caused by", "to the extent arising from", "but only to the extent"), remove every broad-causation phrase from the block ("however caused", "arising out of", "in any way connected with", "resulting from", "regardless of cause").
5. NO BARE CONJUNCTIONS. No paragraph may begin with "and", "or" or "but".
6. STANDALONE PROSE. Every block must read as grammatically complete, standalone legal prose ending in terminal punctuation."#;

pub const REDLINE_SYSTEM: &str = r#"You are a senior contracts attorney reviewing an agreement on behalf of our company. Propose the edits that bring the agreement in line with our positions, drafted as precise block replacements.

OUTPUT FORMAT (strict JSON, nothing else):
{
  "edits": [
    { "section": "short label for the clause",
      "operation": "replace_block",
      "anchor_start": "verbatim text where the block begins",
      "anchor_end": "verbatim text where the block ends",
      "new_text": "the complete replacement for the whole block" }
  ],
  "self_check": {
    "no_duplicate_sentence_starts": true,
    "no_orphaned_fragments": true,
    "no_duplicate_definitions": true,
    "no_contradictory_modifiers": true,
    "no_paragraph_starts_with_and": true
  }
}

If you cannot or should not propose edits, output exactly:
{ "edits": [], "error": "<reason>" }

ANCHORS:
- "anchor_start" and "anchor_end" must be copied character-for-character from the document.
- "anchor_start" must be unique in the document; include enough words to make it so.
- "anchor_end" must occur after "anchor_start".
- Edits must not overlap one another.

SELF CHECK:
- Report each self_check flag honestly; set a flag to false if your edits violate it.

Do not wrap the JSON in Markdown fences. Do not add commentary before or after the JSON object.

"#;

/// Full system prompt: instructions followed by the hard rules.
pub fn system_prompt() -> String {
    format!("{}{}", REDLINE_SYSTEM, HARD_RULES)
}

/// User content for the first attempt. All inputs must already be normalized.
pub fn build_user_content(
    document: &str,
    reference_clauses: Option<&str>,
    playbook: Option<&str>,
) -> String {
    let mut sections = Vec::new();

    if let Some(references) = reference_clauses.map(str::trim).filter(|r| !r.is_empty()) {
        sections.push(format!(
            "REFERENCE CLAUSES (approved language from prior agreements; adapt, do not copy blindly):\n{}",
            references
        ));
    }

    if let Some(playbook) = playbook.map(str::trim).filter(|p| !p.is_empty()) {
        sections.push(format!(
            "PLAYBOOK (our negotiating positions; compare the agreement against these):\n{}",
            playbook
        ));
    }

    sections.push(format!(
        "CONTRACT TEXT:\n<<<CONTRACT\n{}\nCONTRACT>>>",
        document
    ));
    sections.push(
        "Review the contract and return your edits as JSON following the output format and hard rules."
            .to_string(),
    );

    sections.join("\n\n")
}

/// User content for the second attempt: the original content plus every
/// finding from the first attempt and a restatement of the hard rules.
pub fn build_retry_content(original_user: &str, feedback: &RetryFeedback) -> String {
    let mut block = String::from(
        "YOUR PREVIOUS RESPONSE FAILED AUTOMATED QUALITY CHECKS. Regenerate the complete set of edits with these problems fixed.\n",
    );

    match feedback {
        RetryFeedback::Issues(issues) => {
            let errors: Vec<&QualityIssue> = issues
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .collect();
            let warnings: Vec<&QualityIssue> = issues
                .iter()
                .filter(|i| i.severity == Severity::Warning)
                .collect();

            if !errors.is_empty() {
                block.push_str("\nERRORS (must fix):\n");
                for issue in errors {
                    block.push_str(&format!("- {}\n", issue));
                }
            }
            if !warnings.is_empty() {
                block.push_str("\nWARNINGS (fix if possible):\n");
                for issue in warnings {
                    block.push_str(&format!("- {}\n", issue));
                }
            }
        }
        RetryFeedback::Unusable(reason) => {
            block.push_str(&format!(
                "\nYour previous response could not be used: {}\nOutput ONLY the JSON object described in the output format.\n",
                reason
            ));
        }
    }

    block.push('\n');
    block.push_str(HARD_RULES);

    format!("{}\n\n{}", original_user, block)
}

/// Why a second attempt is being made.
#[derive(Debug, Clone)]
pub enum RetryFeedback {
    /// The first attempt parsed but the quality gate found errors.
    Issues(Vec<QualityIssue>),
    /// The first attempt produced no usable output (empty or unparseable).
    Unusable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redline::IssueKind;

    #[test]
    fn test_system_prompt_carries_contract_and_rules() {
        let prompt = system_prompt();
        assert!(prompt.contains("\"operation\": \"replace_block\""));
        assert!(prompt.contains("\"no_paragraph_starts_with_and\""));
        assert!(prompt.contains("\"error\": \"<reason>\""));
        assert!(prompt.contains("FULL-BLOCK REPLACEMENT ONLY"));
        assert!(prompt.contains("NO BARE CONJUNCTIONS"));
    }

    #[test]
    fn test_user_content_orders_context_before_contract() {
        let content = build_user_content("THE AGREEMENT.", Some("Clause A."), Some("Cap liability."));
        let refs = content.find("REFERENCE CLAUSES").unwrap();
        let playbook = content.find("PLAYBOOK").unwrap();
        let contract = content.find("THE AGREEMENT.").unwrap();
        assert!(refs < playbook && playbook < contract);
    }

    #[test]
    fn test_user_content_skips_empty_context() {
        let content = build_user_content("THE AGREEMENT.", Some("   "), None);
        assert!(!content.contains("REFERENCE CLAUSES"));
        assert!(!content.contains("PLAYBOOK"));
    }

    #[test]
    fn test_retry_content_lists_errors_and_warnings() {
        let issues = vec![
            QualityIssue::error(IssueKind::ContradictoryModifiers, "conflict")
                .with_section("Indemnity")
                .with_evidence("however caused"),
            QualityIssue::warning(IssueKind::IncompleteSentence, "truncated"),
        ];
        let content = build_retry_content("ORIGINAL", &RetryFeedback::Issues(issues));
        assert!(content.starts_with("ORIGINAL\n\n"));
        assert!(content.contains("ERRORS (must fix):\n- [error] contradictory_modifiers in Indemnity"));
        assert!(content.contains("WARNINGS (fix if possible):\n- [warning] incomplete_sentence"));
        assert!(content.ends_with(HARD_RULES));
    }

    #[test]
    fn test_retry_content_for_unusable_output() {
        let content = build_retry_content("ORIGINAL", &RetryFeedback::Unusable("not JSON".into()));
        assert!(content.contains("could not be used: not JSON"));
        assert!(!content.contains("ERRORS"));
    }
}
