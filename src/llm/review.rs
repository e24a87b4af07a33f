//! Review orchestration
//!
//! One review is at most two generator calls. The first attempt is retried
//! once, with feedback, when the quality gate finds an error or the output is
//! unusable; whatever the second attempt produces is final. If the second
//! call fails outright the first attempt's result is used instead.

use super::client::Generator;
use super::models::{merge_usage, Usage};
use super::parse::{parse_generation, GenerationResult};
use super::prompts::{build_retry_content, build_user_content, system_prompt, RetryFeedback};
use crate::cancel::CancellationToken;
use crate::error::{ReviewError, Result};
use crate::redline::gate::severity_counts;
use crate::redline::{
    apply_edits, normalize, render_diff, should_retry, validate, DiffMarkers, Edit, GateConfig,
    QualityIssue,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source of pre-formatted reference clauses to show the generator.
pub trait ClauseRetriever: Send + Sync {
    fn retrieve<'a>(
        &'a self,
        document: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Serves the same clause block for every document.
#[derive(Debug, Clone)]
pub struct StaticClauses {
    text: String,
}

impl StaticClauses {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ClauseRetriever for StaticClauses {
    fn retrieve<'a>(
        &'a self,
        _document: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(self.text.clone()) })
    }
}

/// Everything a caller gets back from a review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    /// Diff-annotated text
    pub redlined_text: String,
    /// Normalized input
    pub original_text: String,
    /// Normalized input with the accepted edits applied
    pub modified_text: String,
    pub edits: Vec<Edit>,
    /// Every remaining gate finding, errors included; absent when there are none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_warnings: Option<Vec<String>>,
    pub retry_attempted: bool,
    /// Edits that could not be applied, with the reason
    pub failed_edits: Vec<String>,
    /// The generator's own refusal text, if it declined to edit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_error: Option<String>,
    /// Generator calls made (1 or 2)
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub review_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

/// One parsed and validated generation.
#[derive(Debug, Clone)]
struct Attempt {
    result: GenerationResult,
    issues: Vec<QualityIssue>,
}

/// Where the retry protocol stands.
enum AttemptState {
    First,
    Second {
        feedback: RetryFeedback,
        /// First attempt's result, used if the second call fails.
        fallback: Option<Attempt>,
    },
}

pub struct Reviewer {
    generator: Box<dyn Generator>,
    retriever: Option<Box<dyn ClauseRetriever>>,
    gate: GateConfig,
    markers: DiffMarkers,
}

impl Reviewer {
    pub fn new(generator: impl Generator + 'static) -> Self {
        Self {
            generator: Box::new(generator),
            retriever: None,
            gate: GateConfig::default(),
            markers: DiffMarkers::default(),
        }
    }

    pub fn with_retriever(mut self, retriever: impl ClauseRetriever + 'static) -> Self {
        self.retriever = Some(Box::new(retriever));
        self
    }

    pub fn with_gate_config(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_markers(mut self, markers: DiffMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Review `document`, optionally against a playbook, and return the redline.
    ///
    /// Fails only when no usable generation was obtained, or on cancellation.
    /// Nothing is applied once `cancel` has fired.
    pub async fn review(
        &self,
        document: &str,
        playbook: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome> {
        let source = normalize(document);
        let playbook = playbook.map(normalize);
        let references = self.reference_clauses(&source, cancel).await?;

        let system = system_prompt();
        let user = build_user_content(&source, references.as_deref(), playbook.as_deref());

        let mut usage: Option<Usage> = None;
        let mut attempts = 0u32;
        let mut state = AttemptState::First;

        let (attempt, retry_attempted) = loop {
            match state {
                AttemptState::First => {
                    attempts += 1;
                    match self
                        .run_attempt(1, &system, &user, &source, cancel, &mut usage)
                        .await
                    {
                        Ok(first) if should_retry(&first.issues) => {
                            info!("quality gate found errors, retrying once with feedback");
                            state = AttemptState::Second {
                                feedback: RetryFeedback::Issues(first.issues.clone()),
                                fallback: Some(first),
                            };
                        }
                        Ok(first) => break (first, false),
                        Err(e) if e.is_output_failure() => {
                            warn!(error = %e, "first attempt unusable, retrying once");
                            state = AttemptState::Second {
                                feedback: RetryFeedback::Unusable(e.to_string()),
                                fallback: None,
                            };
                        }
                        Err(e) => return Err(e),
                    }
                }
                AttemptState::Second { feedback, fallback } => {
                    attempts += 1;
                    let retry_user = build_retry_content(&user, &feedback);
                    match self
                        .run_attempt(2, &system, &retry_user, &source, cancel, &mut usage)
                        .await
                    {
                        Ok(second) => break (second, true),
                        Err(e) if e.is_attempt_failure() => match fallback {
                            Some(first) => {
                                warn!(error = %e, "second attempt failed, keeping first attempt");
                                break (first, true);
                            }
                            None => return Err(e),
                        },
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled);
        }

        let report = apply_edits(&source, &attempt.result.edits);
        let redlined_text = render_diff(&source, &report.document, &self.markers);

        let quality_warnings = if attempt.issues.is_empty() {
            None
        } else {
            Some(attempt.issues.iter().map(ToString::to_string).collect())
        };

        info!(
            attempts,
            applied = report.applied,
            failed = report.failures.len(),
            retry_attempted,
            "review complete"
        );

        Ok(ReviewOutcome {
            redlined_text,
            original_text: source,
            modified_text: report.document,
            edits: attempt.result.edits,
            quality_warnings,
            retry_attempted,
            failed_edits: report.failures,
            generator_error: attempt.result.error,
            attempts,
            usage,
            review_id: Uuid::new_v4(),
            completed_at: Utc::now(),
        })
    }

    /// Retrieved reference clauses, normalized. Retrieval problems never fail
    /// the review; cancellation does.
    async fn reference_clauses(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(retriever) = self.retriever.as_ref() else {
            return Ok(None);
        };
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReviewError::Cancelled),
            retrieved = retriever.retrieve(source) => retrieved,
        };
        Ok(match retrieved {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(normalize(&text)),
            Err(e) => {
                warn!(error = %e, "reference clause retrieval failed, continuing without it");
                None
            }
        })
    }

    /// Call the generator, parse, normalize the edits and gate them.
    async fn run_attempt(
        &self,
        number: u32,
        system: &str,
        user: &str,
        source: &str,
        cancel: &CancellationToken,
        usage: &mut Option<Usage>,
    ) -> Result<Attempt> {
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled);
        }
        info!(attempt = number, "requesting edits");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReviewError::Cancelled),
            response = self.generator.generate(system, user) => response,
        };
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled);
        }

        let response = response.map_err(|e| {
            warn!(attempt = number, error = %e, "generation failed");
            e
        })?;
        *usage = merge_usage(usage.take(), response.usage);

        if response.content.trim().is_empty() {
            return Err(ReviewError::EmptyResponse);
        }

        let parsed = parse_generation(&response.content)?;
        let edits: Vec<Edit> = parsed.edits.iter().map(Edit::normalized).collect();
        let issues = validate(&edits, source, parsed.self_check.as_ref(), self.gate);

        let (errors, warnings) = severity_counts(&issues);
        info!(
            attempt = number,
            edits = edits.len(),
            errors,
            warnings,
            refused = parsed.error.is_some(),
            "attempt validated"
        );
        for issue in &issues {
            debug!(attempt = number, "{}", issue);
        }

        Ok(Attempt {
            result: GenerationResult { edits, ..parsed },
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::LlmResponse;
    use crate::redline::IssueKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const SOURCE: &str = "INDEMNIFICATION. Contractor shall indemnify Client however caused. ";

    /// Replays canned responses in order and records every user prompt.
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<LlmResponse>>>,
        prompts: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<LlmResponse>>) -> (Self, std::sync::Arc<Mutex<Vec<String>>>) {
            let prompts = std::sync::Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    responses: Mutex::new(responses.into()),
                    prompts: prompts.clone(),
                },
                prompts,
            )
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate<'a>(
            &'a self,
            _system: &'a str,
            user: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>> {
            self.prompts.lock().unwrap().push(user.to_string());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ReviewError::Transport("script exhausted".into())));
            Box::pin(async move { next })
        }
    }

    /// Never answers.
    struct HangingGenerator;

    impl Generator for HangingGenerator {
        fn generate<'a>(
            &'a self,
            _system: &'a str,
            _user: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    /// Never returns any clauses.
    struct HangingRetriever;

    impl ClauseRetriever for HangingRetriever {
        fn retrieve<'a>(
            &'a self,
            _document: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    struct FailingRetriever;

    impl ClauseRetriever for FailingRetriever {
        fn retrieve<'a>(
            &'a self,
            _document: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async { Err(anyhow::anyhow!("clause index offline")) })
        }
    }

    fn reply(json: serde_json::Value) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: json.to_string(),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
                cost: None,
            }),
        })
    }

    fn one_edit(section: &str, new_text: &str) -> Result<LlmResponse> {
        reply(serde_json::json!({
            "edits": [{
                "section": section,
                "operation": "replace_block",
                "anchor_start": "INDEMNIFICATION.",
                "anchor_end": "however caused.",
                "new_text": new_text,
            }]
        }))
    }

    const GOOD_TEXT: &str =
        "INDEMNIFICATION. Contractor shall indemnify Client to the extent caused by Contractor's negligence.";
    const CONTRADICTORY_TEXT: &str =
        "INDEMNIFICATION. Contractor shall indemnify Client to the extent caused by negligence, however caused.";

    #[tokio::test]
    async fn test_end_to_end_indemnification() {
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit("Indemnity", GOOD_TEXT)]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prompts.lock().unwrap().len(), 1);
        assert!(!outcome.retry_attempted);
        assert!(outcome.quality_warnings.is_none());
        assert!(outcome.failed_edits.is_empty());
        assert_eq!(outcome.original_text, SOURCE);
        assert_eq!(outcome.modified_text, format!("{} ", GOOD_TEXT));
        assert!(outcome.redlined_text.contains("~~however caused."));
        assert!(outcome
            .redlined_text
            .contains("<u>to the extent caused by Contractor's negligence."));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.usage.unwrap().total_tokens, 120);
    }

    #[tokio::test]
    async fn test_retry_terminates_after_two_calls() {
        let (generator, prompts) = ScriptedGenerator::new(vec![
            one_edit("First", CONTRADICTORY_TEXT),
            one_edit("Second", CONTRADICTORY_TEXT),
            one_edit("Third", GOOD_TEXT),
        ]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("ERRORS (must fix)"));
        assert!(prompts[1].contains("contradictory_modifiers"));
        assert!(outcome.retry_attempted);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.edits[0].section, "Second");
        // errors that survive the ceiling are surfaced, not fatal
        let warnings = outcome.quality_warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("contradictory_modifiers")));
        assert_eq!(outcome.usage.unwrap().total_tokens, 240);
    }

    #[tokio::test]
    async fn test_warnings_alone_do_not_retry() {
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit(
            "Indemnity",
            "INDEMNIFICATION. Contractor shall indemnify Client to the extent caused by Contractor's negligence",
        )]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(prompts.lock().unwrap().len(), 1);
        assert!(!outcome.retry_attempted);
        let warnings = outcome.quality_warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains(IssueKind::IncompleteSentence.as_str())));
    }

    #[tokio::test]
    async fn test_second_attempt_transport_failure_falls_back() {
        let (generator, _) = ScriptedGenerator::new(vec![
            one_edit("First", CONTRADICTORY_TEXT),
            Err(ReviewError::Http {
                status: 502,
                message: "bad gateway".into(),
            }),
        ]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.retry_attempted);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.edits[0].section, "First");
        assert!(outcome.quality_warnings.is_some());
    }

    #[tokio::test]
    async fn test_first_attempt_transport_failure_aborts() {
        let (generator, prompts) = ScriptedGenerator::new(vec![
            Err(ReviewError::Transport("connection refused".into())),
            one_edit("Unused", GOOD_TEXT),
        ]);
        let err = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Transport(_)));
        assert_eq!(prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_first_attempt_is_retried() {
        let (generator, prompts) = ScriptedGenerator::new(vec![
            Ok(LlmResponse {
                content: "Sorry, here is my analysis instead of JSON.".into(),
                usage: None,
            }),
            one_edit("Indemnity", GOOD_TEXT),
        ]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(prompts.lock().unwrap()[1].contains("could not be used"));
        assert!(outcome.retry_attempted);
        assert!(outcome.quality_warnings.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_twice_is_an_error() {
        let (generator, _) = ScriptedGenerator::new(vec![
            Ok(LlmResponse::default()),
            Ok(LlmResponse {
                content: "still not json".into(),
                usage: None,
            }),
        ]);
        let err = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Parse(_)));
    }

    #[tokio::test]
    async fn test_refusal_is_surfaced_without_edits() {
        let (generator, _) = ScriptedGenerator::new(vec![reply(
            serde_json::json!({"edits": [], "error": "Document is not a contract"}),
        )]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.generator_error.as_deref(),
            Some("Document is not a contract")
        );
        assert!(outcome.edits.is_empty());
        assert_eq!(outcome.modified_text, outcome.original_text);
        assert_eq!(outcome.redlined_text, SOURCE);
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_generation() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };
        let reviewer = Reviewer::new(HangingGenerator);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            reviewer.review(SOURCE, None, &token),
        )
        .await
        .unwrap();
        canceller.await.unwrap();
        assert!(matches!(result, Err(ReviewError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let token = CancellationToken::new();
        token.cancel();
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit("Indemnity", GOOD_TEXT)]);
        let result = Reviewer::new(generator).review(SOURCE, None, &token).await;
        assert!(matches!(result, Err(ReviewError::Cancelled)));
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_clause_retrieval() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit("Indemnity", GOOD_TEXT)]);
        let reviewer = Reviewer::new(generator).with_retriever(HangingRetriever);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            reviewer.review(SOURCE, None, &token),
        )
        .await
        .unwrap();
        canceller.await.unwrap();
        assert!(matches!(result, Err(ReviewError::Cancelled)));
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retriever_failure_is_not_fatal() {
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit("Indemnity", GOOD_TEXT)]);
        let outcome = Reviewer::new(generator)
            .with_retriever(FailingRetriever)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!prompts.lock().unwrap()[0].contains("REFERENCE CLAUSES"));
        assert!(outcome.failed_edits.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_normalized_into_prompt() {
        let (generator, prompts) = ScriptedGenerator::new(vec![one_edit("Indemnity", GOOD_TEXT)]);
        Reviewer::new(generator)
            .with_retriever(StaticClauses::new("Approved: \u{201C}Losses\u{201D} means direct losses."))
            .review(
                SOURCE,
                Some("Cap liability at fees paid\u{2014}never unlimited."),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Approved: \"Losses\" means direct losses."));
        assert!(prompt.contains("fees paid-never unlimited."));
    }

    #[tokio::test]
    async fn test_unresolvable_edit_is_named_not_fatal() {
        let (generator, _) = ScriptedGenerator::new(vec![
            reply(serde_json::json!({"edits": [{
                "section": "Insurance",
                "anchor_start": "INSURANCE.",
                "anchor_end": "coverage.",
                "new_text": "INSURANCE. Contractor shall maintain coverage."
            }]})),
            reply(serde_json::json!({"edits": [{
                "section": "Insurance",
                "anchor_start": "INSURANCE.",
                "anchor_end": "coverage.",
                "new_text": "INSURANCE. Contractor shall maintain coverage."
            }]})),
        ]);
        let outcome = Reviewer::new(generator)
            .review(SOURCE, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.retry_attempted);
        assert_eq!(outcome.failed_edits.len(), 1);
        assert!(outcome.failed_edits[0].starts_with("Insurance"));
        assert_eq!(outcome.modified_text, SOURCE);
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = ReviewOutcome {
            redlined_text: String::new(),
            original_text: String::new(),
            modified_text: String::new(),
            edits: Vec::new(),
            quality_warnings: None,
            retry_attempted: false,
            failed_edits: Vec::new(),
            generator_error: None,
            attempts: 1,
            usage: None,
            review_id: Uuid::nil(),
            completed_at: Utc::now(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("redlinedText").is_some());
        assert!(json.get("retryAttempted").is_some());
        assert!(json.get("qualityWarnings").is_none());
        assert!(json.get("reviewId").is_some());
    }
}
