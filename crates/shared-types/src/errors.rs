//! # Error Types
//!
//! Client-visible error taxonomy plus configuration errors shared across
//! subsystems.
//!
//! | Variant | Terminal | Retried by the client protocol |
//! |---------|----------|--------------------------------|
//! | `TransactionInvalid` | yes | never |
//! | `Conflict` | yes | never |
//! | `Unavailable` | after retries | within protocol bounds |
//! | `Cancelled` | yes (client-local) | never |
//! | `Internal` | yes (client-local) | never |

use crate::entities::{PartyId, StateRef, TxId};
use thiserror::Error;

/// Errors surfaced to the submitter of a commit request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotaryError {
    /// Request failed validation before ordering.
    #[error("Transaction invalid: {reason}")]
    TransactionInvalid { reason: String },

    /// An input was already consumed by another transaction.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Quorum could not be reached. No state was committed by this attempt.
    #[error("Notary unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The caller cancelled the request locally.
    #[error("Notarisation cancelled by caller")]
    Cancelled,

    /// The client's own bookkeeping broke; says nothing about the request.
    #[error("Notary client internal error: {reason}")]
    Internal { reason: String },
}

impl NotaryError {
    /// Shorthand for `TransactionInvalid`.
    pub fn invalid(reason: impl Into<String>) -> Self {
        NotaryError::TransactionInvalid {
            reason: reason.into(),
        }
    }

    /// Whether resubmitting the whole request later can change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotaryError::Unavailable { .. })
    }
}

/// Double-spend report with full provenance of the winning transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Input {state_ref} of {tx_id} already consumed by {consuming_tx} (input #{input_index})"
)]
pub struct ConflictError {
    /// Transaction that lost.
    pub tx_id: TxId,
    /// Conflicting input.
    pub state_ref: StateRef,
    /// Transaction that consumed it.
    pub consuming_tx: TxId,
    /// Index of `state_ref` within the consuming transaction's inputs.
    pub input_index: u32,
    /// Party that requested the winning commit.
    pub consuming_requester: PartyId,
    /// When the winning commit was agreed (unix millis).
    pub committed_at: u64,
}

/// Invalid cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterConfigError {
    /// Cluster size is not of the form 3f + 1.
    #[error("Cluster size {size} is not of the form 3f + 1")]
    InvalidSize { size: usize },

    /// Replica ids must be 0..N in order.
    #[error("Replica at position {position} has id {id}, expected {position}")]
    OutOfOrder { position: usize, id: u16 },

    /// Two replicas share an identity.
    #[error("Duplicate replica identity at position {position}")]
    DuplicateIdentity { position: usize },

    /// Two replicas share an address.
    #[error("Duplicate replica address {address}")]
    DuplicateAddress { address: String },
}

/// Signed envelope failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Payload could not be encoded for signing.
    #[error("Envelope encoding failed: {0}")]
    Encoding(String),

    /// Sender is not a member of the cluster.
    #[error("Sender {sender} is not a cluster member")]
    UnknownSender { sender: u16 },

    /// Unsupported envelope version.
    #[error("Unsupported version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },

    /// Signature does not verify against the sender's identity.
    #[error("Invalid envelope signature from {sender}")]
    InvalidSignature { sender: u16 },
}

/// Client-to-replica transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No address is known for the replica.
    #[error("No address for replica {replica}")]
    UnknownReplica { replica: u16 },

    /// The replica could not be reached.
    #[error("Replica {replica} unreachable: {reason}")]
    Unreachable { replica: u16, reason: String },
}
