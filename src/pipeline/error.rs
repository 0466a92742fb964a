//! Error taxonomy for the ingestion pipeline
//!
//! - `TransientNetwork`: timeouts, connection failures, 5xx, malformed RPC replies (retry)
//! - `RateLimited`: upstream throttling (retry with the longer backoff floor)
//! - `DataUnavailable`: an event could not be decoded or valued (skip, never retry)
//! - `Configuration`: missing/invalid endpoint settings (fatal at startup only)

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PipelineError::RateLimited { .. })
    }

    /// Whether the scheduler should retry the failed call within the tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork(_) | PipelineError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            return PipelineError::RateLimited { retry_after: None };
        }
        if err.is_decode() {
            return PipelineError::TransientNetwork(format!("malformed response: {}", err));
        }
        PipelineError::TransientNetwork(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
