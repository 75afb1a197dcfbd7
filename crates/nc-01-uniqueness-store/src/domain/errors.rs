//! # Domain Errors
//!
//! A conflict is not an error here: it is a normal `Decision`. Errors are
//! reserved for failures that leave the request undecided.

use thiserror::Error;

/// Durable log failures.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying file I/O failed.
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record batch could not be encoded or decoded.
    #[error("Log encoding error: {0}")]
    Encoding(String),

    /// Another process holds the log.
    #[error("Log file {path} is locked by another process")]
    Locked { path: String },
}

/// Uniqueness store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Appending to the durable log failed; nothing was committed.
    #[error("Durable log append failed: {0}")]
    Log(#[source] LogError),

    /// Replaying the durable log on open failed.
    #[error("Durable log replay failed: {0}")]
    Replay(#[source] LogError),

    /// The replayed log assigns one key to two transactions.
    #[error("Durable log is inconsistent: {state_ref} recorded twice")]
    CorruptLog { state_ref: String },

    /// Shard count must be positive.
    #[error("Shard count must be at least 1")]
    InvalidShardCount,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
