//! Centralized error taxonomy for the ingestion pipeline.
//!
//! Every store and fetch failure is translated into one of these variants
//! at the task boundary, where the worker decides retry-or-drop. Only
//! `Checkpoint` is allowed to take the whole process down.

use std::time::Duration;

use thiserror::Error;

/// Main error type for crawl operations.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Retryable store failure (connection drop, lock timeout, ...).
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// Retryable fetch failure (network, 5xx, ...).
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// The platform asked us to back off.
    #[error("rate limited by platform (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Same external identifier already committed under a different kind.
    /// Never retried; the task lands in the dead-letter table.
    #[error("entity conflict for '{external_id}': stored kind '{stored}', fetched kind '{fetched}'")]
    EntityConflict {
        external_id: String,
        stored: String,
        fetched: String,
    },

    /// Unknown kind or missing required fields. Never retried.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The platform has no entity for this identifier.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Checkpoint storage failure. Fatal: durability outranks liveness.
    #[error("checkpoint storage failure: {0}")]
    Checkpoint(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for crawl operations.
pub type CrawlResult<T> = Result<T, CrawlError>;

impl CrawlError {
    /// Whether a task hitting this error should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::TransientStore(_)
                | CrawlError::TransientFetch(_)
                | CrawlError::RateLimited { .. }
        )
    }

    /// Whether this error must halt the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Checkpoint(_))
    }

    pub fn transient_store(msg: impl std::fmt::Display) -> Self {
        Self::TransientStore(msg.to_string())
    }

    pub fn transient_fetch(msg: impl std::fmt::Display) -> Self {
        Self::TransientFetch(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(CrawlError::transient_store("db gone").is_retryable());
        assert!(CrawlError::RateLimited { retry_after: None }.is_retryable());
        assert!(!CrawlError::MalformedPayload("bad".into()).is_retryable());
        assert!(!CrawlError::EntityConflict {
            external_id: "x".into(),
            stored: "channel".into(),
            fetched: "user".into(),
        }
        .is_retryable());
    }

    #[test]
    fn only_checkpoint_is_fatal() {
        assert!(CrawlError::Checkpoint("disk full".into()).is_fatal());
        assert!(!CrawlError::transient_store("blip").is_fatal());
        assert!(!CrawlError::NotFound("chan_x".into()).is_fatal());
    }
}
