//! # Conflict Reporter
//!
//! Pure translation from an agreed `Decision::Conflict` into the error handed
//! to the client. No I/O, no side effects.

use crate::entities::{ConsumingRecord, Decision, StateRef, TxId};
use crate::errors::{ConflictError, NotaryError};

/// Translates internal conflict records into client-visible errors.
pub struct ConflictReporter;

impl ConflictReporter {
    /// Build the client error for `tx_id` losing `state_ref` to `record`.
    pub fn report(tx_id: TxId, state_ref: StateRef, record: &ConsumingRecord) -> ConflictError {
        ConflictError {
            tx_id,
            state_ref,
            consuming_tx: record.consuming_tx,
            input_index: record.input_index,
            consuming_requester: record.requester,
            committed_at: record.committed_at,
        }
    }

    /// Translate a decision; `None` for `Decision::Commit`.
    pub fn from_decision(tx_id: TxId, decision: &Decision) -> Option<NotaryError> {
        match decision {
            Decision::Commit => None,
            Decision::Conflict { state_ref, record } => Some(NotaryError::Conflict(
                Self::report(tx_id, *state_ref, record),
            )),
        }
    }
}
