//! Redliner library crate
//!
//! Anchor-based contract redlining: normalize a contract, ask a text
//! generator for block-replacement edits, gate them, apply them and render
//! the result as a redline. The binary is a thin CLI over these modules;
//! benchmarks use them directly.

pub mod cancel;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod redline;
pub mod util;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{Result, ReviewError};
pub use llm::{ReviewOutcome, Reviewer};
