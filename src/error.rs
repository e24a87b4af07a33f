//! Error taxonomy for the review pipeline.
//!
//! Per-edit problems (unresolvable anchors, malformed edits) are values, not
//! errors; see `redline::apply`. What lands here ends a generation attempt or
//! the whole review.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("No API key configured. Run 'redliner setup' or set REDLINER_API_KEY.")]
    MissingApiKey,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation service unreachable: {0}")]
    Transport(String),

    #[error("Generation service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Generation service returned an empty response")]
    EmptyResponse,

    #[error("Could not parse generator output: {0}")]
    Parse(String),

    #[error("Review was cancelled")]
    Cancelled,
}

impl ReviewError {
    /// Errors that count as one failed generation attempt.
    ///
    /// Everything else (cancellation, missing credentials, bad config) ends
    /// the review regardless of which attempt was running.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            ReviewError::Transport(_)
                | ReviewError::Http { .. }
                | ReviewError::EmptyResponse
                | ReviewError::Parse(_)
        )
    }

    /// Failures where the generator produced something, just not something usable.
    /// A first attempt that fails this way is still worth a corrective retry.
    pub fn is_output_failure(&self) -> bool {
        matches!(self, ReviewError::EmptyResponse | ReviewError::Parse(_))
    }
}

impl From<reqwest::Error> for ReviewError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReviewError::Transport(
                "request timed out before the generator finished. Try a longer --timeout."
                    .to_string(),
            )
        } else {
            ReviewError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_failure_classification() {
        assert!(ReviewError::Transport("down".into()).is_attempt_failure());
        assert!(ReviewError::Http {
            status: 502,
            message: "bad gateway".into()
        }
        .is_attempt_failure());
        assert!(ReviewError::EmptyResponse.is_attempt_failure());
        assert!(ReviewError::Parse("eof".into()).is_attempt_failure());
        assert!(!ReviewError::Cancelled.is_attempt_failure());
        assert!(!ReviewError::MissingApiKey.is_attempt_failure());
    }

    #[test]
    fn test_output_failure_excludes_transport() {
        assert!(ReviewError::EmptyResponse.is_output_failure());
        assert!(!ReviewError::Transport("down".into()).is_output_failure());
    }
}
