use super::models::Usage;
use crate::config::Config;
use crate::error::{ReviewError, Result};
use crate::util::truncate_str;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response from the generator including content and usage stats
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Anything that can turn a system + user prompt into text.
///
/// Implemented by [`OpenRouterClient`] for real runs and by stubs in tests.
pub trait Generator: Send + Sync {
    fn generate<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  Request shapes
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    usage: UsageRequest,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct UsageRequest {
    include: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
//  SSE accumulation
// ═══════════════════════════════════════════════════════════════════════════

/// Incremental parser for an OpenAI-style server-sent-event stream.
///
/// Network chunks can end anywhere, including in the middle of a line or a
/// multi-byte character, so bytes are buffered until a full line is present.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    pending: Vec<u8>,
    content: String,
    usage: Option<Usage>,
    done: bool,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.handle_line(&String::from_utf8_lossy(&line))?;
            if self.done {
                self.pending.clear();
                break;
            }
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Flush any unterminated final line and return what was collected.
    pub fn finish(mut self) -> Result<LlmResponse> {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&String::from_utf8_lossy(&line))?;
        }
        Ok(LlmResponse {
            content: self.content,
            usage: self.usage,
        })
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() || line.starts_with(':') {
            return Ok(());
        }
        let Some(data) = line.strip_prefix("data:") else {
            // `event:`, `id:` and `retry:` fields carry nothing we use
            return Ok(());
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let event: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "skipping unparseable stream event");
                return Ok(());
            }
        };

        if let Some(error) = event.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ReviewError::Transport(format!(
                "provider error mid-stream: {}",
                sanitize_error_body(&message)
            )));
        }

        if let Some(delta) = event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            self.content.push_str(delta);
        }

        if let Some(usage) = event.get("usage").filter(|u| u.is_object()) {
            match serde_json::from_value::<Usage>(usage.clone()) {
                Ok(parsed) => self.usage = Some(parsed),
                Err(e) => debug!(error = %e, "ignoring malformed usage block"),
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  OpenRouter client
// ═══════════════════════════════════════════════════════════════════════════

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Error bodies longer than this are cut before they reach logs or users.
const MAX_ERROR_BODY_CHARS: usize = 300;

const APP_REFERER: &str = "https://github.com/redliner/redliner";
const APP_TITLE: &str = "Redliner";

fn backoff_for(retry: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry.saturating_sub(1)))
}

/// Truncates long error bodies and redacts anything that looks like a credential.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "sk-or-",
        "sk-",
        "bearer",
        "api_key",
        "apikey",
        "secret",
        "password",
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_CHARS {
        format!("{}... (truncated)", truncate_str(body, MAX_ERROR_BODY_CHARS))
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    truncated
}

/// Streaming chat-completions client for OpenRouter (or any compatible endpoint).
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterClient {
    /// Build a client from the effective configuration. Fails when no API key
    /// is available or the endpoint is not a usable URL.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.get_api_key().ok_or(ReviewError::MissingApiKey)?;
        let endpoint = config.validated_endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            endpoint,
            model: config.model_id(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(&self, system: &str, user: &str) -> Result<LlmResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
            usage: UsageRequest { include: true },
        };

        let mut retry_count = 0;
        let response = loop {
            let sent = self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("HTTP-Referer", APP_REFERER)
                .header("X-Title", APP_TITLE)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_connect() && retry_count < MAX_RETRIES => {
                    retry_count += 1;
                    let wait = backoff_for(retry_count);
                    warn!(
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "connection failed, retrying ({}/{})",
                        retry_count,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                break response;
            }

            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = backoff_for(retry_count);
                warn!(
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, retrying ({}/{})", retry_count, MAX_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let message = match status.as_u16() {
                401 => "invalid API key; run `redliner setup` to update it".to_string(),
                429 => format!(
                    "rate limited after {} retries; try again in a few minutes",
                    retry_count
                ),
                _ => sanitize_error_body(&body),
            };
            return Err(ReviewError::Http {
                status: status.as_u16(),
                message,
            });
        };

        let mut accumulator = SseAccumulator::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            accumulator.push(&chunk?)?;
            if accumulator.is_done() {
                break;
            }
        }
        let result = accumulator.finish()?;

        if result.content.trim().is_empty() {
            return Err(ReviewError::EmptyResponse);
        }

        info!(
            model = %self.model,
            chars = result.content.len(),
            total_tokens = result.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
            "generation complete"
        );
        Ok(result)
    }
}

impl Generator for OpenRouterClient {
    fn generate<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>> {
        Box::pin(self.stream_completion(system, user))
    }
}
