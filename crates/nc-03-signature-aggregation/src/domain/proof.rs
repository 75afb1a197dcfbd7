//! Quorum proof
//!
//! A decision together with the replica signatures that vouch for it. The
//! signer bitmap is indexed by position in the cluster configuration.

use std::collections::BTreeMap;

use bitvec::prelude::*;
use shared_types::{
    AggregatedResult, ClusterConfig, Decision, IdentityVerifier, ReplicaId, ReplicaVote,
    Signature, TxId,
};

use crate::error::{AggregationError, AggregationResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumProof {
    pub tx_id: TxId,
    pub decision: Decision,
    pub signatures: BTreeMap<ReplicaId, Signature>,
    /// Which cluster members signed, by configuration index.
    pub signers: BitVec<u8, Msb0>,
}

impl QuorumProof {
    pub(crate) fn new(
        tx_id: TxId,
        decision: Decision,
        signatures: BTreeMap<ReplicaId, Signature>,
        cluster: &ClusterConfig,
    ) -> Self {
        let signers = signer_bitmap(&signatures, cluster);
        Self {
            tx_id,
            decision,
            signatures,
            signers,
        }
    }

    /// Rebuild a proof from a received result, e.g. to verify it.
    pub fn from_result(result: &AggregatedResult, cluster: &ClusterConfig) -> Self {
        Self::new(
            result.tx_id,
            result.decision.clone(),
            result.signatures.clone(),
            cluster,
        )
    }

    pub fn signer_count(&self) -> usize {
        self.signers.count_ones()
    }

    /// Check that a quorum of cluster members signed this decision.
    pub fn verify(
        &self,
        cluster: &ClusterConfig,
        verifier: &dyn IdentityVerifier,
    ) -> AggregationResult<()> {
        if self.signatures.len() < cluster.quorum() {
            return Err(AggregationError::InsufficientSignatures {
                have: self.signatures.len(),
                need: cluster.quorum(),
            });
        }
        if self.signers != signer_bitmap(&self.signatures, cluster)
            || self.signer_count() != self.signatures.len()
        {
            return Err(AggregationError::SignerMismatch);
        }

        let payload = ReplicaVote::signing_payload(&self.tx_id, &self.decision);
        for (replica, signature) in &self.signatures {
            let identity = cluster
                .identity_of(*replica)
                .ok_or(AggregationError::UnknownReplica(*replica))?;
            if !verifier.verify_signature(&payload, signature, &identity) {
                return Err(AggregationError::InvalidSignature(*replica));
            }
        }
        Ok(())
    }

    pub fn into_result(self) -> AggregatedResult {
        AggregatedResult {
            tx_id: self.tx_id,
            decision: self.decision,
            signatures: self.signatures,
        }
    }
}

fn signer_bitmap(
    signatures: &BTreeMap<ReplicaId, Signature>,
    cluster: &ClusterConfig,
) -> BitVec<u8, Msb0> {
    let mut bits = bitvec![u8, Msb0; 0; cluster.size()];
    for (index, info) in cluster.replicas().iter().enumerate() {
        if signatures.contains_key(&info.id) {
            bits.set(index, true);
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::{Ed25519IdentityVerifier, PartyId, ReplicaInfo};

    fn keys() -> Vec<Ed25519KeyPair> {
        (0..4u8).map(|i| Ed25519KeyPair::from_seed([i + 1; 32])).collect()
    }

    fn cluster(keys: &[Ed25519KeyPair]) -> ClusterConfig {
        ClusterConfig::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ReplicaInfo {
                    id: ReplicaId(i as u16),
                    identity: PartyId::of(k),
                    address: format!("local://{}", i),
                })
                .collect(),
        )
        .unwrap()
    }

    fn signed_by(keys: &[Ed25519KeyPair], who: &[usize]) -> BTreeMap<ReplicaId, Signature> {
        who.iter()
            .map(|i| {
                let vote = ReplicaVote::signed(ReplicaId(*i as u16), TxId([9; 32]), Decision::Commit, &keys[*i]);
                (vote.replica, vote.signature)
            })
            .collect()
    }

    #[test]
    fn test_quorum_proof_verifies() {
        let keys = keys();
        let cluster = cluster(&keys);
        let proof = QuorumProof::new(TxId([9; 32]), Decision::Commit, signed_by(&keys, &[0, 2, 3]), &cluster);

        assert_eq!(proof.signer_count(), 3);
        assert_eq!(proof.signers.iter().by_vals().collect::<Vec<_>>(), vec![true, false, true, true]);
        assert!(proof.verify(&cluster, &Ed25519IdentityVerifier).is_ok());
    }

    #[test]
    fn test_proof_below_quorum_rejected() {
        let keys = keys();
        let cluster = cluster(&keys);
        let proof = QuorumProof::new(TxId([9; 32]), Decision::Commit, signed_by(&keys, &[0, 1]), &cluster);
        assert_eq!(
            proof.verify(&cluster, &Ed25519IdentityVerifier),
            Err(AggregationError::InsufficientSignatures { have: 2, need: 3 })
        );
    }

    #[test]
    fn test_proof_for_other_decision_rejected() {
        let keys = keys();
        let cluster = cluster(&keys);
        let mut proof = QuorumProof::new(TxId([9; 32]), Decision::Commit, signed_by(&keys, &[0, 1, 2]), &cluster);
        proof.tx_id = TxId([8; 32]);
        assert!(matches!(
            proof.verify(&cluster, &Ed25519IdentityVerifier),
            Err(AggregationError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_tampered_bitmap_rejected() {
        let keys = keys();
        let cluster = cluster(&keys);
        let mut proof = QuorumProof::new(TxId([9; 32]), Decision::Commit, signed_by(&keys, &[0, 1, 2]), &cluster);
        proof.signers.set(3, true);
        assert_eq!(
            proof.verify(&cluster, &Ed25519IdentityVerifier),
            Err(AggregationError::SignerMismatch)
        );
    }

    #[test]
    fn test_result_roundtrip_keeps_signatures() {
        let keys = keys();
        let cluster = cluster(&keys);
        let proof = QuorumProof::new(TxId([9; 32]), Decision::Commit, signed_by(&keys, &[1, 2, 3]), &cluster);
        let rebuilt = QuorumProof::from_result(&proof.clone().into_result(), &cluster);
        assert_eq!(rebuilt, proof);
    }
}
