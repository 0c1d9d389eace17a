use thiserror::Error;

/// Why a single feed produced no items.
///
/// None of these abort a crawl; the orchestrator logs them and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connection, TLS or body read failure
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body is not RSS, Atom or JSON Feed
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<feed_rs::parser::ParseFeedError> for FetchError {
    fn from(err: feed_rs::parser::ParseFeedError) -> Self {
        FetchError::Parse(err.to_string())
    }
}
