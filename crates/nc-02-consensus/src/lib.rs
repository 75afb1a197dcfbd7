//! # nc-02-consensus
//!
//! Byzantine agreement on the order of notarisation requests.
//!
//! ## Architecture
//!
//! A cluster of N = 3f+1 replicas runs a PBFT-style protocol. The primary of
//! the current view assigns each request a sequence number and a commit
//! timestamp; once 2f+1 replicas have prepared and committed the assignment,
//! every correct replica executes the request against its own uniqueness
//! store in sequence order and signs the resulting decision.
//!
//! ```text
//! client ──submit──→ ReplicaHandle ──→ ReplicaService (tokio task)
//!                                          │ owns
//!                                          ↓
//!                          ReplicaCore ──→ UniquenessStore (nc-01)
//!                                          │ effects
//!                                          ↓
//!                                     PeerNetwork
//! ```
//!
//! ## Security
//!
//! - Every agreement message travels in a signed envelope; the envelope
//!   sender is authoritative and checked against the cluster membership.
//! - Requests are re-validated by every replica before it prepares them.
//! - Certificates carry the signed votes they are built from.
//! - A replica that signs two different votes for the same slot is flagged.

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryNetwork, LocalReplicaTransport};
pub use domain::{
    AgreementMessage, ClientOutcome, ConsensusError, ConsensusResult, Effect, Envelope,
    ReplicaConfig, ReplicaCore,
};
pub use ports::{PeerNetwork, SystemTimeSource, TimeSource};
pub use service::{ReplicaDependencies, ReplicaHandle, ReplicaService};
