//! # nc-03-signature-aggregation
//!
//! Turns individual replica votes into a quorum proof.
//!
//! ```text
//! ReplicaVote ──add_vote──→ SignatureAggregator ──2f+1 identical──→ QuorumProof
//!                                                                      │
//!                                           verify(cluster, identity) ←┘
//! ```
//!
//! The proof is the set of `(replica id, signature)` pairs plus a signer
//! bitmap; any holder of the cluster configuration can check it.

pub mod domain;
pub mod error;

pub use domain::{QuorumProof, SignatureAggregator, VoteStatus};
pub use error::{AggregationError, AggregationResult};
