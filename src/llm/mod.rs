//! Generation side of the pipeline: prompt construction, the streaming
//! OpenRouter client, output parsing and the two-attempt review loop.

pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod review;

pub use client::{Generator, LlmResponse, OpenRouterClient, SseAccumulator};
pub use models::{merge_usage, Model, Usage};
pub use parse::{parse_generation, GenerationResult};
pub use review::{ClauseRetriever, ReviewOutcome, Reviewer, StaticClauses};
