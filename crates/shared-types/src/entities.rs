//! # Core Domain Entities
//!
//! The data model of the uniqueness service.
//!
//! ## Clusters
//!
//! - **Ledger references**: `TxId`, `StateRef`, `PartyId`
//! - **Commit log**: `ConsumingRecord`, `CommitRequest`
//! - **Agreement outcome**: `Decision`, `ReplicaVote`, `AggregatedResult`
//!
//! Every byte string that ends up under a signature is produced by an
//! explicit `*_payload` function below. Signers and verifiers share those
//! functions so the encoding can never drift between them.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{sha256_many, Digest32, Ed25519KeyPair};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::errors::NotaryError;
use crate::ports::IdentityVerifier;

/// A 32-byte hash.
pub type Hash = [u8; 32];

/// Maximum number of inputs a single commit request may reference.
pub const MAX_INPUTS_PER_REQUEST: usize = 4096;

// =============================================================================
// CLUSTER A: LEDGER REFERENCES
// =============================================================================

/// Transaction identifier (fixed-length hash of the transaction).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TxId(pub Hash);

impl TxId {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Pointer to one output of a ledger transaction.
///
/// Immutable value; the key of the commit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    /// Transaction that created the output.
    pub tx_id: TxId,
    /// Output index within that transaction.
    pub index: u32,
}

impl StateRef {
    /// Create a new state reference.
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }

    /// Canonical 36-byte encoding.
    pub fn encode(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&self.tx_id.0);
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// Party identity: an Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct PartyId(pub [u8; 32]);

impl PartyId {
    /// Identity of a keypair.
    pub fn of(keypair: &Ed25519KeyPair) -> Self {
        Self(*keypair.public_key().as_bytes())
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyId({:02x}{:02x}{:02x}{:02x})", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Index of a replica within the ordered cluster configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub u16);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

/// A 64-byte Ed25519 signature.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde_as(as = "Bytes")] pub [u8; 64]);

impl Signature {
    /// Sign `payload` with `keypair`.
    pub fn create(keypair: &Ed25519KeyPair, payload: &[u8]) -> Self {
        Self(keypair.sign(payload))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

// =============================================================================
// CLUSTER B: COMMIT LOG
// =============================================================================

/// Record of which transaction consumed a state reference.
///
/// Written exactly once per `StateRef`; immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumingRecord {
    /// The consumed output.
    pub state_ref: StateRef,
    /// Transaction that consumed it.
    pub consuming_tx: TxId,
    /// Position of `state_ref` in the consuming transaction's input list.
    pub input_index: u32,
    /// Party that requested the winning commit.
    pub requester: PartyId,
    /// Commit timestamp (unix millis), agreed through ordering.
    pub committed_at: u64,
}

impl ConsumingRecord {
    /// Canonical encoding, used inside signed decisions.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36 + 32 + 4 + 32 + 8);
        out.extend_from_slice(&self.state_ref.encode());
        out.extend_from_slice(&self.consuming_tx.0);
        out.extend_from_slice(&self.input_index.to_le_bytes());
        out.extend_from_slice(&self.requester.0);
        out.extend_from_slice(&self.committed_at.to_le_bytes());
        out
    }
}

/// Request to consume a set of state references atomically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Transaction being notarised.
    pub tx_id: TxId,
    /// Ordered inputs; all-or-nothing.
    pub inputs: Vec<StateRef>,
    /// Requesting party.
    pub requester: PartyId,
    /// Requester's signature over `CommitRequest::signing_payload`.
    pub signature: Signature,
}

impl CommitRequest {
    /// Build and sign a request.
    pub fn signed(tx_id: TxId, inputs: Vec<StateRef>, keypair: &Ed25519KeyPair) -> Self {
        let payload = Self::signing_payload(&tx_id, &inputs);
        Self {
            tx_id,
            inputs,
            requester: PartyId::of(keypair),
            signature: Signature::create(keypair, &payload),
        }
    }

    /// Bytes the requester signs.
    pub fn signing_payload(tx_id: &TxId, inputs: &[StateRef]) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + 32 + 4 + inputs.len() * 36);
        out.extend_from_slice(b"NC-COMMIT-REQUEST");
        out.extend_from_slice(&tx_id.0);
        out.extend_from_slice(&(inputs.len() as u32).to_le_bytes());
        for input in inputs {
            out.extend_from_slice(&input.encode());
        }
        out
    }

    /// Payload of this request.
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(&self.tx_id, &self.inputs)
    }

    /// Digest binding every field, including the signature.
    pub fn digest(&self) -> Digest32 {
        sha256_many(&[self.payload().as_slice(), &self.requester.0, &self.signature.0])
    }

    /// Digest of what the request asks for: transaction, inputs and
    /// requester. Two submissions with the same content digest are the same
    /// request even if their signature bytes differ.
    pub fn content_digest(&self) -> Digest32 {
        sha256_many(&[self.payload().as_slice(), &self.requester.0])
    }

    /// Structural checks plus requester signature authenticity.
    pub fn validate(&self, verifier: &dyn IdentityVerifier) -> Result<(), NotaryError> {
        self.validate_structure()?;
        if !verifier.verify_signature(&self.payload(), &self.signature, &self.requester) {
            return Err(NotaryError::invalid("requester signature does not verify"));
        }
        Ok(())
    }

    /// Structural checks that need no collaborator.
    pub fn validate_structure(&self) -> Result<(), NotaryError> {
        if self.inputs.is_empty() {
            return Err(NotaryError::invalid("request has no inputs"));
        }
        if self.inputs.len() > MAX_INPUTS_PER_REQUEST {
            return Err(NotaryError::invalid(format!(
                "request has {} inputs, limit is {}",
                self.inputs.len(),
                MAX_INPUTS_PER_REQUEST
            )));
        }
        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input) {
                return Err(NotaryError::invalid(format!("duplicate input {}", input)));
            }
        }
        Ok(())
    }
}

// =============================================================================
// CLUSTER C: AGREEMENT OUTCOME
// =============================================================================

/// Outcome of ordering a request against the commit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Every input is now owned by the request's transaction.
    Commit,
    /// `state_ref` was already consumed as described by `record`.
    Conflict {
        /// First conflicting input, in the request's own input order.
        state_ref: StateRef,
        /// Existing consuming record.
        record: ConsumingRecord,
    },
}

impl Decision {
    /// True for `Decision::Commit`.
    pub fn is_commit(&self) -> bool {
        matches!(self, Decision::Commit)
    }

    /// Canonical encoding.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Decision::Commit => vec![0u8],
            Decision::Conflict { state_ref, record } => {
                let mut out = vec![1u8];
                out.extend_from_slice(&state_ref.encode());
                out.extend_from_slice(&record.encode());
                out
            }
        }
    }
}

/// One replica's signed verdict for a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaVote {
    /// Voting replica.
    pub replica: ReplicaId,
    /// Transaction the vote is about.
    pub tx_id: TxId,
    /// The replica's decision.
    pub decision: Decision,
    /// Partial signature over `ReplicaVote::signing_payload`.
    pub signature: Signature,
}

impl ReplicaVote {
    /// Build and sign a vote.
    pub fn signed(
        replica: ReplicaId,
        tx_id: TxId,
        decision: Decision,
        keypair: &Ed25519KeyPair,
    ) -> Self {
        let payload = Self::signing_payload(&tx_id, &decision);
        Self {
            replica,
            tx_id,
            decision,
            signature: Signature::create(keypair, &payload),
        }
    }

    /// Bytes a replica signs for a decision.
    ///
    /// The replica id is not part of the payload: every replica signs the
    /// same bytes for the same outcome.
    pub fn signing_payload(tx_id: &TxId, decision: &Decision) -> Vec<u8> {
        let mut out = Vec::with_capacity(15 + 32 + 1);
        out.extend_from_slice(b"NC-REPLICA-VOTE");
        out.extend_from_slice(&tx_id.0);
        out.extend_from_slice(&decision.encode());
        out
    }

    /// Payload of this vote.
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(&self.tx_id, &self.decision)
    }
}

/// Quorum-backed outcome for a transaction.
///
/// Only produced once at least 2f+1 replicas signed the identical
/// `(tx_id, decision)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Transaction the result is about.
    pub tx_id: TxId,
    /// The agreed decision.
    pub decision: Decision,
    /// `(replica, signature)` pairs over the same vote payload.
    pub signatures: BTreeMap<ReplicaId, Signature>,
}

impl AggregatedResult {
    /// True if the agreed decision is a commit.
    pub fn is_success(&self) -> bool {
        self.decision.is_commit()
    }

    /// Number of signatures in the proof.
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// The payload every signature in the proof covers.
    pub fn signed_payload(&self) -> Vec<u8> {
        ReplicaVote::signing_payload(&self.tx_id, &self.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u8) -> TxId {
        TxId([n; 32])
    }

    #[test]
    fn test_signed_request_roundtrip_payload() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let request = CommitRequest::signed(tx(9), vec![StateRef::new(tx(1), 0)], &key);

        assert_eq!(request.requester, PartyId::of(&key));
        assert!(key
            .public_key()
            .verify(&request.payload(), &request.signature.0)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_foreign_signature() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let mut request = CommitRequest::signed(tx(9), vec![StateRef::new(tx(1), 0)], &key);
        assert!(request.validate(&crate::Ed25519IdentityVerifier).is_ok());

        request.requester = PartyId::of(&Ed25519KeyPair::from_seed([2u8; 32]));
        assert!(matches!(
            request.validate(&crate::Ed25519IdentityVerifier),
            Err(NotaryError::TransactionInvalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_inputs() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let request = CommitRequest::signed(tx(9), vec![], &key);
        assert!(matches!(
            request.validate_structure(),
            Err(NotaryError::TransactionInvalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_inputs() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let input = StateRef::new(tx(1), 3);
        let request = CommitRequest::signed(tx(9), vec![input, input], &key);
        assert!(request.validate_structure().is_err());
    }

    #[test]
    fn test_digest_covers_signature() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let mut request = CommitRequest::signed(tx(9), vec![StateRef::new(tx(1), 0)], &key);
        let before = request.digest();
        request.signature.0[0] ^= 0x01;
        assert_ne!(before, request.digest());
    }

    #[test]
    fn test_content_digest_tracks_inputs_not_signature() {
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        let mut request = CommitRequest::signed(tx(9), vec![StateRef::new(tx(1), 0)], &key);
        let before = request.content_digest();
        request.signature.0[0] ^= 0x01;
        assert_eq!(before, request.content_digest());

        let other = CommitRequest::signed(tx(9), vec![StateRef::new(tx(1), 1)], &key);
        assert_ne!(before, other.content_digest());
    }

    #[test]
    fn test_vote_payload_independent_of_replica() {
        let key_a = Ed25519KeyPair::from_seed([1; 32]);
        let key_b = Ed25519KeyPair::from_seed([2; 32]);
        let a = ReplicaVote::signed(ReplicaId(0), tx(2), Decision::Commit, &key_a);
        let b = ReplicaVote::signed(ReplicaId(3), tx(2), Decision::Commit, &key_b);
        assert_eq!(a.payload(), b.payload());
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_conflict_encoding_differs_from_commit() {
        let record = ConsumingRecord {
            state_ref: StateRef::new(tx(1), 0),
            consuming_tx: tx(3),
            input_index: 0,
            requester: PartyId([5; 32]),
            committed_at: 42,
        };
        let conflict = Decision::Conflict {
            state_ref: record.state_ref,
            record,
        };
        assert_ne!(conflict.encode(), Decision::Commit.encode());
        assert!(!conflict.is_commit());
    }

    #[test]
    fn test_state_ref_ordering_is_by_tx_then_index() {
        let a = StateRef::new(tx(1), 5);
        let b = StateRef::new(tx(2), 0);
        let c = StateRef::new(tx(1), 6);
        let mut refs = vec![b, c, a];
        refs.sort();
        assert_eq!(refs, vec![a, c, b]);
    }
}
