use std::time::Duration;

use thiserror::Error;

/// Failure of a single adapter call. On the live path every variant is
/// recovered by falling back; on the replica path it is terminal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("fetch exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("replica store error: {0}")]
    Storage(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Timeout(_) => "timeout",
            SourceError::Transport(_) => "transport",
            SourceError::MalformedResponse(_) => "malformed",
            SourceError::Storage(_) => "storage",
        }
    }

    /// Maps a reqwest failure onto the taxonomy. Body decode problems are the
    /// provider's fault, not the network's.
    pub fn from_http(e: reqwest::Error, budget: Duration) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(budget)
        } else if e.is_decode() {
            SourceError::MalformedResponse(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}
