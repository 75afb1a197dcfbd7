//! # Certificates
//!
//! Verification of quorum certificates and the deterministic computation of
//! a new view's re-proposals. Every replica runs the same functions over the
//! same signed inputs, so every correct replica reaches the same result.

use std::collections::{BTreeMap, BTreeSet};

use shared_crypto::Digest32;
use shared_types::{ClusterConfig, IdentityVerifier};

use super::error::{ConsensusError, ConsensusResult};
use super::messages::{
    AgreementMessage, CommittedEntry, Envelope, OrderedEntry, PreparedCertificate, ViewChange,
};

/// Check that `envelopes` are a quorum of distinct, authentic members whose
/// payloads all satisfy `matches`.
fn verify_quorum(
    envelopes: &[Envelope],
    cluster: &ClusterConfig,
    identity: &dyn IdentityVerifier,
    what: &'static str,
    matches: impl Fn(&AgreementMessage) -> bool,
) -> ConsensusResult<()> {
    let mut signers = BTreeSet::new();
    for envelope in envelopes {
        envelope.verify(cluster, identity)?;
        if !matches(&envelope.payload) {
            return Err(ConsensusError::InvalidCertificate {
                what,
                reason: format!("mismatched {} from {}", envelope.payload.kind(), envelope.sender),
            });
        }
        if !signers.insert(envelope.sender) {
            return Err(ConsensusError::InvalidCertificate {
                what,
                reason: format!("duplicate signer {}", envelope.sender),
            });
        }
    }
    if signers.len() < cluster.quorum() {
        return Err(ConsensusError::InvalidCertificate {
            what,
            reason: format!("{} signer(s), quorum is {}", signers.len(), cluster.quorum()),
        });
    }
    Ok(())
}

/// Verify a prepared certificate.
pub fn verify_prepared(
    cert: &PreparedCertificate,
    cluster: &ClusterConfig,
    identity: &dyn IdentityVerifier,
) -> ConsensusResult<()> {
    let digest = cert.entry.digest();
    verify_quorum(&cert.prepares, cluster, identity, "prepared certificate", |m| {
        matches!(m, AgreementMessage::Prepare(v)
            if v.view == cert.view && v.seq == cert.seq && v.digest == digest)
    })
}

/// Verify a committed entry received during catch-up.
pub fn verify_committed(
    entry: &CommittedEntry,
    cluster: &ClusterConfig,
    identity: &dyn IdentityVerifier,
) -> ConsensusResult<()> {
    let digest = entry.entry.digest();
    verify_quorum(&entry.commits, cluster, identity, "commit certificate", |m| {
        matches!(m, AgreementMessage::Commit(v)
            if v.view == entry.view && v.seq == entry.seq && v.digest == digest)
    })
}

/// Verify that `proof` stabilises the checkpoint `(seq, digest)`.
///
/// The genesis checkpoint (seq 0, zero digest) needs no proof.
pub fn verify_checkpoint_proof(
    seq: u64,
    digest: &Digest32,
    proof: &[Envelope],
    cluster: &ClusterConfig,
    identity: &dyn IdentityVerifier,
) -> ConsensusResult<()> {
    if seq == 0 {
        return if *digest == [0u8; 32] {
            Ok(())
        } else {
            Err(ConsensusError::InvalidCertificate {
                what: "checkpoint proof",
                reason: "genesis checkpoint with non-zero digest".into(),
            })
        };
    }
    verify_quorum(proof, cluster, identity, "checkpoint proof", |m| {
        matches!(m, AgreementMessage::Checkpoint(c) if c.seq == seq && c.digest == *digest)
    })
}

/// Verify every certificate inside a view change.
pub fn verify_view_change(
    vc: &ViewChange,
    cluster: &ClusterConfig,
    identity: &dyn IdentityVerifier,
    log_window: u64,
) -> ConsensusResult<()> {
    verify_checkpoint_proof(vc.stable_seq, &vc.stable_digest, &vc.checkpoint_proof, cluster, identity)?;

    let mut seqs = BTreeSet::new();
    for cert in &vc.prepared {
        if cert.view >= vc.new_view {
            return Err(ConsensusError::InvalidCertificate {
                what: "view change",
                reason: format!("certificate from view {} not below {}", cert.view, vc.new_view),
            });
        }
        if cert.seq <= vc.stable_seq || cert.seq > vc.stable_seq + log_window {
            return Err(ConsensusError::InvalidCertificate {
                what: "view change",
                reason: format!("certificate for seq {} outside window", cert.seq),
            });
        }
        if !seqs.insert(cert.seq) {
            return Err(ConsensusError::InvalidCertificate {
                what: "view change",
                reason: format!("two certificates for seq {}", cert.seq),
            });
        }
        verify_prepared(cert, cluster, identity)?;
    }
    Ok(())
}

/// What a new view starts from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reproposals {
    /// Highest stable checkpoint reported by the view changes.
    pub low_seq: u64,
    pub low_digest: Digest32,
    /// Entries re-proposed for `low_seq + 1 ..= high`, gaps filled with nulls.
    pub entries: Vec<(u64, OrderedEntry)>,
}

impl Reproposals {
    /// Highest sequence number in use after the view change.
    pub fn high_seq(&self) -> u64 {
        self.entries.last().map(|(seq, _)| *seq).unwrap_or(self.low_seq)
    }
}

/// Re-proposals for a new view from a verified set of view changes.
///
/// For every sequence number above the highest stable checkpoint, the
/// prepared certificate from the highest view wins; sequence numbers with
/// no certificate get a null entry.
pub fn compute_reproposals(view_changes: &[ViewChange]) -> Reproposals {
    let (low_seq, low_digest) = view_changes
        .iter()
        .map(|vc| (vc.stable_seq, vc.stable_digest))
        .max_by_key(|(seq, _)| *seq)
        .unwrap_or((0, [0u8; 32]));

    let mut best: BTreeMap<u64, &PreparedCertificate> = BTreeMap::new();
    for cert in view_changes.iter().flat_map(|vc| vc.prepared.iter()) {
        if cert.seq <= low_seq {
            continue;
        }
        match best.get(&cert.seq) {
            Some(current) if current.view >= cert.view => {}
            _ => {
                best.insert(cert.seq, cert);
            }
        }
    }

    let high = best.keys().next_back().copied().unwrap_or(low_seq);
    let entries = (low_seq + 1..=high)
        .map(|seq| {
            let entry = best
                .get(&seq)
                .map(|cert| cert.entry.clone())
                .unwrap_or_else(OrderedEntry::null);
            (seq, entry)
        })
        .collect();

    Reproposals {
        low_seq,
        low_digest,
        entries,
    }
}
