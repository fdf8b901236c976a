use std::time::Duration;

use thiserror::Error;

use crate::query::QueryError;
use crate::source::SourceError;

/// Failures surfaced to the caller of `resolve`. Live-path failures never
/// appear here; they only drive fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("query could not be answered within {0:?}")]
    Timeout(Duration),

    #[error("no data available: {0}")]
    NoDataAvailable(#[source] SourceError),

    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
}

impl RouterError {
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Timeout(_) => "timeout",
            RouterError::NoDataAvailable(_) => "no_data_available",
            RouterError::InvalidQuery(_) => "invalid_query",
        }
    }
}
