//! Error types for the sync pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Permanent request failure (bad credentials, 4xx other than 429,
    /// malformed provider envelope). Never retried.
    #[error("auth or request error: {0}")]
    AuthOrRequest(String),

    /// Provider kept returning 429 past the configured retry bound.
    /// `attempts` counts every request issued, the first included.
    #[error("rate limit exceeded after {attempts} requests: {url}")]
    RateLimitExceeded { url: String, attempts: u32 },

    /// Transient network failure (timeout, 5xx) that outlived its retries.
    #[error("network error: {0}")]
    Network(String),

    /// A record's payload did not match the feed schema. Per-record,
    /// recoverable: the record is dropped and the run continues.
    #[error("shape error in field `{field}`: {reason}")]
    Shape { field: &'static str, reason: String },

    /// Storage-level conflict or transient database failure for one record.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("unknown sport: {0}")]
    UnknownSport(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Fatal errors abort the whole run; everything else is folded into
    /// the run outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthOrRequest(_)
                | SyncError::RateLimitExceeded { .. }
                | SyncError::Network(_)
                | SyncError::UnknownSport(_)
        )
    }
}
