//! # Shared Types Crate
//!
//! Domain entities, wire contracts, the error taxonomy and the collaborator
//! ports shared by every notary subsystem.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: all cross-subsystem types are defined here.
//! - **Explicit signing payloads**: everything that is signed is encoded by
//!   one function, shared by signer and verifier.
//! - **Envelope Authority**: agreement messages travel in `SignedMessage<T>`;
//!   its `sender` is authoritative.

pub mod cluster;
pub mod conflict;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ports;
pub mod wire;

pub use cluster::{ClusterConfig, ReplicaInfo};
pub use conflict::ConflictReporter;
pub use entities::*;
pub use envelope::SignedMessage;
pub use errors::*;
pub use identity::{Ed25519IdentityVerifier, StaticAddressResolver};
pub use ports::{AddressResolver, IdentityVerifier, ReplicaResponse, ReplicaTransport};
pub use wire::{AggregatedResultWire, CommitRequestWire, ConflictDetail, OutcomeTag};

/// Result alias for client-facing operations.
pub type NotaryResult<T> = Result<T, NotaryError>;
