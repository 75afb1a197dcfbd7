//! Error types for the aggregation subsystem.

use shared_types::{ReplicaId, TxId};
use thiserror::Error;

/// Reasons a vote is discarded or a proof is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Vote from replica {0} outside the cluster")]
    UnknownReplica(ReplicaId),

    #[error("Vote for {got}, aggregating {expected}")]
    TransactionMismatch { expected: TxId, got: TxId },

    #[error("Invalid signature from replica {0}")]
    InvalidSignature(ReplicaId),

    #[error("Duplicate vote from replica {0}")]
    DuplicateVote(ReplicaId),

    /// The replica already voted for a different decision.
    #[error("Replica {0} voted for two different decisions")]
    Equivocation(ReplicaId),

    #[error("Quorum already reached")]
    AlreadyComplete,

    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Signer bitmap does not match the signature set")]
    SignerMismatch,
}

/// Result type for aggregation operations.
pub type AggregationResult<T> = Result<T, AggregationError>;
