//! # Signature Aggregator
//!
//! Collects replica votes for one transaction until 2f+1 of them agree on
//! the same decision.
//!
//! ## Discard rules
//!
//! - votes for another transaction
//! - votes from replicas outside the cluster
//! - votes whose signature does not verify against the replica's identity
//! - a second vote from the same replica (a different decision also flags
//!   the replica as an equivocator; only its first vote counts)
//! - anything arriving after quorum
//!
//! Quorum counts identical votes only. Faulty replicas can split the tally
//! but can never push a decision past 2f+1 on their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use shared_types::{ClusterConfig, Decision, IdentityVerifier, ReplicaId, ReplicaVote, Signature, TxId};
use tracing::{debug, warn};

use super::proof::QuorumProof;
use crate::error::{AggregationError, AggregationResult};

/// Outcome of adding a vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteStatus {
    /// Counted; quorum not reached yet.
    Pending,
    /// This vote completed a quorum.
    QuorumReached(QuorumProof),
}

struct Tally {
    decision: Decision,
    signatures: BTreeMap<ReplicaId, Signature>,
}

pub struct SignatureAggregator {
    tx_id: TxId,
    cluster: Arc<ClusterConfig>,
    verifier: Arc<dyn IdentityVerifier>,
    tallies: Vec<Tally>,
    /// First decision each replica voted for, as an index into `tallies`.
    voted: BTreeMap<ReplicaId, usize>,
    equivocators: BTreeSet<ReplicaId>,
    proof: Option<QuorumProof>,
}

impl SignatureAggregator {
    pub fn new(
        tx_id: TxId,
        cluster: Arc<ClusterConfig>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            tx_id,
            cluster,
            verifier,
            tallies: Vec::new(),
            voted: BTreeMap::new(),
            equivocators: BTreeSet::new(),
            proof: None,
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Count `vote`, or explain why it was discarded.
    pub fn add_vote(&mut self, vote: ReplicaVote) -> AggregationResult<VoteStatus> {
        let result = self.try_add(vote);
        if let Err(e) = &result {
            debug!("[nc-03] {} vote discarded: {}", self.tx_id, e);
        }
        result
    }

    fn try_add(&mut self, vote: ReplicaVote) -> AggregationResult<VoteStatus> {
        if self.proof.is_some() {
            return Err(AggregationError::AlreadyComplete);
        }
        if vote.tx_id != self.tx_id {
            return Err(AggregationError::TransactionMismatch {
                expected: self.tx_id,
                got: vote.tx_id,
            });
        }
        let identity = self
            .cluster
            .identity_of(vote.replica)
            .ok_or(AggregationError::UnknownReplica(vote.replica))?;
        if !self
            .verifier
            .verify_signature(&vote.payload(), &vote.signature, &identity)
        {
            return Err(AggregationError::InvalidSignature(vote.replica));
        }

        if let Some(&first) = self.voted.get(&vote.replica) {
            if self.tallies[first].decision == vote.decision {
                return Err(AggregationError::DuplicateVote(vote.replica));
            }
            if self.equivocators.insert(vote.replica) {
                warn!("[nc-03] replica {} equivocated on {}", vote.replica, self.tx_id);
            }
            return Err(AggregationError::Equivocation(vote.replica));
        }

        let index = match self.tallies.iter().position(|t| t.decision == vote.decision) {
            Some(index) => index,
            None => {
                self.tallies.push(Tally {
                    decision: vote.decision.clone(),
                    signatures: BTreeMap::new(),
                });
                self.tallies.len() - 1
            }
        };
        self.voted.insert(vote.replica, index);
        let tally = &mut self.tallies[index];
        tally.signatures.insert(vote.replica, vote.signature);

        if tally.signatures.len() < self.cluster.quorum() {
            return Ok(VoteStatus::Pending);
        }
        let proof = QuorumProof::new(
            self.tx_id,
            tally.decision.clone(),
            tally.signatures.clone(),
            &self.cluster,
        );
        debug!(
            "[nc-03] quorum for {} with {} signature(s)",
            self.tx_id,
            proof.signatures.len()
        );
        self.proof = Some(proof.clone());
        Ok(VoteStatus::QuorumReached(proof))
    }

    pub fn proof(&self) -> Option<&QuorumProof> {
        self.proof.as_ref()
    }

    /// Replicas that voted for more than one decision.
    pub fn equivocators(&self) -> &BTreeSet<ReplicaId> {
        &self.equivocators
    }

    /// Distinct replicas whose vote was counted.
    pub fn votes_counted(&self) -> usize {
        self.voted.len()
    }

    /// Whether replicas not heard from yet could still complete a quorum.
    pub fn quorum_reachable(&self) -> bool {
        if self.proof.is_some() {
            return true;
        }
        let unheard = self.cluster.size() - self.voted.len();
        let best = self
            .tallies
            .iter()
            .map(|t| t.signatures.len())
            .max()
            .unwrap_or(0);
        best + unheard >= self.cluster.quorum()
    }
}
