//! # Collaborator Ports
//!
//! Narrow interfaces to the systems the notary relies on but does not own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{CommitRequest, PartyId, ReplicaId, ReplicaVote, Signature};
use crate::errors::TransportError;

/// Identity / PKI collaborator.
///
/// Authenticates requester signatures and replica signatures before the
/// engine or the aggregator trusts them.
pub trait IdentityVerifier: Send + Sync {
    /// True iff `signature` over `payload` was produced by `claimed`.
    fn verify_signature(&self, payload: &[u8], signature: &Signature, claimed: &PartyId) -> bool;
}

/// Cluster address resolution collaborator.
pub trait AddressResolver: Send + Sync {
    /// Network address of `replica`, if known.
    fn resolve_replica(&self, replica: ReplicaId) -> Option<String>;
}

/// Answer of a single replica to a commit request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaResponse {
    /// The replica ordered the request and signed its decision.
    Vote(ReplicaVote),
    /// The replica refused the request during validation.
    Invalid { replica: ReplicaId, reason: String },
    /// The replica cannot order requests right now.
    Unavailable { replica: ReplicaId, reason: String },
}

/// Client-to-replica request transport.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Submit `request` to `replica` and wait for its answer.
    ///
    /// The future may stay pending for as long as the replica has not
    /// decided; callers bound it with their own timeout.
    async fn submit(
        &self,
        replica: ReplicaId,
        request: CommitRequest,
    ) -> Result<ReplicaResponse, TransportError>;
}
