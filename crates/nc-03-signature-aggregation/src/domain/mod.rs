//! Domain layer for signature aggregation.

pub mod aggregator;
pub mod proof;

pub use aggregator::{SignatureAggregator, VoteStatus};
pub use proof::QuorumProof;
