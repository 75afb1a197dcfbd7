//! Error types for the consensus subsystem.

use nc_01_uniqueness_store::StoreError;
use shared_types::{EnvelopeError, ReplicaId};

/// Consensus error types.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Envelope rejected: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Invalid {what}: {reason}")]
    InvalidCertificate { what: &'static str, reason: String },

    #[error("Unexpected message from {sender}: {reason}")]
    UnexpectedMessage { sender: ReplicaId, reason: String },

    #[error("Invalid request in proposal: {0}")]
    InvalidRequest(String),

    #[error("Uniqueness store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Replica halted after a store failure")]
    Halted,

    #[error("Unknown replica: {0}")]
    UnknownReplica(ReplicaId),

    #[error("Invalid replica configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
