//! Error taxonomy for storage, stream, and gateway-level validation.

use thiserror::Error;

/// Errors from the [`crate::storage::Storage`] trait.
///
/// The gateway maps every variant to the same `500` for appends and a
/// terminated response stream for subscribes — the core does not retry and
/// does not distinguish transient I/O from decode failures to callers, only
/// in logs (spec.md §7).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Codec(#[from] serde_json::Error),

    #[cfg(feature = "sql-storage")]
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Errors surfaced on a subscribe stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("subscriber lagged: queue overflowed")]
    SubscriberLagged,
}

/// Gateway-level envelope/request validation failures. Always a `400`.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("'type' must be a non-empty string")]
    EmptyType,

    #[error("'version' must be a non-negative integer")]
    NegativeVersion,

    #[error("invalid stream path")]
    InvalidPath,

    #[error("offset parameter must not be empty")]
    EmptyOffset,

    #[error("offset parameter is not a well-formed offset")]
    InvalidOffset,
}
