//! # Wire Contracts
//!
//! External representations of `CommitRequest` and `AggregatedResult`.
//! Every wire field is optional so that a missing field is a validation
//! failure instead of a decoding panic further down.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::{
    AggregatedResult, CommitRequest, ConsumingRecord, Decision, PartyId, ReplicaId, Signature,
    StateRef, TxId,
};
use crate::errors::NotaryError;

/// Commit request as received from a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequestWire {
    pub tx_id: Option<TxId>,
    pub inputs: Option<Vec<StateRef>>,
    pub requester: Option<PartyId>,
    pub signature: Option<Signature>,
}

impl From<CommitRequest> for CommitRequestWire {
    fn from(request: CommitRequest) -> Self {
        Self {
            tx_id: Some(request.tx_id),
            inputs: Some(request.inputs),
            requester: Some(request.requester),
            signature: Some(request.signature),
        }
    }
}

impl TryFrom<CommitRequestWire> for CommitRequest {
    type Error = NotaryError;

    fn try_from(wire: CommitRequestWire) -> Result<Self, Self::Error> {
        let missing = |field: &str| NotaryError::invalid(format!("missing field `{}`", field));
        let request = CommitRequest {
            tx_id: wire.tx_id.ok_or_else(|| missing("tx_id"))?,
            inputs: wire.inputs.ok_or_else(|| missing("inputs"))?,
            requester: wire.requester.ok_or_else(|| missing("requester"))?,
            signature: wire.signature.ok_or_else(|| missing("signature"))?,
        };
        request.validate_structure()?;
        Ok(request)
    }
}

/// Outcome tag of an aggregated result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeTag {
    Success,
    Conflict,
}

/// Conflict detail carried by a `Conflict` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub state_ref: StateRef,
    pub record: ConsumingRecord,
}

/// Aggregated result as returned to external verifiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResultWire {
    pub tx_id: TxId,
    pub outcome: OutcomeTag,
    /// Signatures over the agreed decision, present for both outcomes.
    pub signatures: Vec<(ReplicaId, Signature)>,
    /// Present iff `outcome == Conflict`.
    pub conflict: Option<ConflictDetail>,
}

impl From<&AggregatedResult> for AggregatedResultWire {
    fn from(result: &AggregatedResult) -> Self {
        let (outcome, conflict) = match &result.decision {
            Decision::Commit => (OutcomeTag::Success, None),
            Decision::Conflict { state_ref, record } => (
                OutcomeTag::Conflict,
                Some(ConflictDetail {
                    state_ref: *state_ref,
                    record: record.clone(),
                }),
            ),
        };
        Self {
            tx_id: result.tx_id,
            outcome,
            signatures: result
                .signatures
                .iter()
                .map(|(replica, sig)| (*replica, *sig))
                .collect(),
            conflict,
        }
    }
}

impl TryFrom<AggregatedResultWire> for AggregatedResult {
    type Error = NotaryError;

    fn try_from(wire: AggregatedResultWire) -> Result<Self, Self::Error> {
        let decision = match (wire.outcome, wire.conflict) {
            (OutcomeTag::Success, None) => Decision::Commit,
            (OutcomeTag::Conflict, Some(detail)) => Decision::Conflict {
                state_ref: detail.state_ref,
                record: detail.record,
            },
            (OutcomeTag::Success, Some(_)) => {
                return Err(NotaryError::invalid("success result carries conflict detail"))
            }
            (OutcomeTag::Conflict, None) => {
                return Err(NotaryError::invalid("conflict result without detail"))
            }
        };
        let mut signatures = BTreeMap::new();
        for (replica, sig) in wire.signatures {
            if signatures.insert(replica, sig).is_some() {
                return Err(NotaryError::invalid(format!(
                    "duplicate signature from {}",
                    replica
                )));
            }
        }
        Ok(AggregatedResult {
            tx_id: wire.tx_id,
            decision,
            signatures,
        })
    }
}
