//! Custom error types for venue-hindex.
//!
//! All fallible functions return `Result<T, HindexError>`. Per-paper soft
//! failures never surface here: they are encoded as sentinel values in the
//! raw dataset. Only conditions that stop the run become errors.

use thiserror::Error;

/// Main error type for venue-hindex operations.
#[derive(Debug, Error)]
pub enum HindexError {
    /// Browser automation error (Chrome session)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by an external service
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External service returned an error status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message
        message: String,
    },

    /// The search engine permanently blocked this session
    #[error("CAPTCHA blocked, the session cannot issue further queries")]
    ChallengeBlocked,

    /// A challenge was presented that could not be resolved
    #[error("CAPTCHA could not be solved: {0}")]
    ChallengeFailed(String),

    /// Audio tooling failed (download, conversion or recognizer launch)
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed browser script result
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl HindexError {
    /// True when the error means the automated session lost the ability to
    /// make progress against the search engine.
    pub fn is_fatal_challenge(&self) -> bool {
        matches!(
            self,
            HindexError::ChallengeBlocked | HindexError::ChallengeFailed(_)
        )
    }
}

/// Result type alias using `HindexError`
pub type Result<T> = std::result::Result<T, HindexError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| HindexError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_challenge_classification() {
        assert!(HindexError::ChallengeBlocked.is_fatal_challenge());
        assert!(HindexError::ChallengeFailed("no iframe".into()).is_fatal_challenge());
        assert!(!HindexError::Parse("bad".into()).is_fatal_challenge());
    }

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u32> = None;
        let err = missing.ok_or_parse("no year header").expect_err("should fail");
        assert_eq!(err.to_string(), "Parse error: no year header");
    }

    #[test]
    fn test_malformed_script_reply_is_json_error() {
        let parse = || -> Result<u32> { Ok(serde_json::from_str::<u32>("{\"v\": 1}")?) };
        assert!(matches!(parse(), Err(HindexError::Json(_))));
    }
}
