//! Default collaborator adapters: Ed25519 verification and a static address
//! table built from the cluster configuration.

use std::collections::HashMap;

use shared_crypto::verify_ed25519;

use crate::cluster::ClusterConfig;
use crate::entities::{PartyId, ReplicaId, Signature};
use crate::ports::{AddressResolver, IdentityVerifier};

/// Verifies signatures by treating a `PartyId` as an Ed25519 public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519IdentityVerifier;

impl IdentityVerifier for Ed25519IdentityVerifier {
    fn verify_signature(&self, payload: &[u8], signature: &Signature, claimed: &PartyId) -> bool {
        verify_ed25519(&claimed.0, payload, &signature.0).is_ok()
    }
}

/// Address table fixed at construction.
#[derive(Debug, Default, Clone)]
pub struct StaticAddressResolver {
    addresses: HashMap<ReplicaId, String>,
}

impl StaticAddressResolver {
    /// Addresses from an explicit table.
    pub fn new(addresses: HashMap<ReplicaId, String>) -> Self {
        Self { addresses }
    }

    /// Addresses as listed in the cluster configuration.
    pub fn from_cluster(cluster: &ClusterConfig) -> Self {
        Self {
            addresses: cluster
                .replicas()
                .iter()
                .map(|info| (info.id, info.address.clone()))
                .collect(),
        }
    }
}

impl AddressResolver for StaticAddressResolver {
    fn resolve_replica(&self, replica: ReplicaId) -> Option<String> {
        self.addresses.get(&replica).cloned()
    }
}
