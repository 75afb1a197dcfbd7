//! # Cluster Configuration
//!
//! Static, ordered replica membership. Runtime reconfiguration is out of
//! scope; a new membership means a new `ClusterConfig`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entities::{PartyId, ReplicaId};
use crate::errors::ClusterConfigError;

/// One cluster member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Position in the ordered configuration.
    pub id: ReplicaId,
    /// Ed25519 identity used to verify this replica's signatures.
    pub identity: PartyId,
    /// Network address the replica listens on.
    pub address: String,
}

/// Ordered replica set with `N = 3f + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    replicas: Vec<ReplicaInfo>,
    fault_bound: usize,
}

impl ClusterConfig {
    /// Validate and build a configuration.
    pub fn new(replicas: Vec<ReplicaInfo>) -> Result<Self, ClusterConfigError> {
        let size = replicas.len();
        if size == 0 || (size - 1) % 3 != 0 {
            return Err(ClusterConfigError::InvalidSize { size });
        }

        let mut identities = HashSet::with_capacity(size);
        let mut addresses = HashSet::with_capacity(size);
        for (position, info) in replicas.iter().enumerate() {
            if info.id.0 as usize != position {
                return Err(ClusterConfigError::OutOfOrder {
                    position,
                    id: info.id.0,
                });
            }
            if !identities.insert(info.identity) {
                return Err(ClusterConfigError::DuplicateIdentity { position });
            }
            if !addresses.insert(info.address.as_str()) {
                return Err(ClusterConfigError::DuplicateAddress {
                    address: info.address.clone(),
                });
            }
        }

        Ok(Self {
            fault_bound: (size - 1) / 3,
            replicas,
        })
    }

    /// Cluster size N.
    pub fn size(&self) -> usize {
        self.replicas.len()
    }

    /// Fault bound f.
    pub fn fault_bound(&self) -> usize {
        self.fault_bound
    }

    /// 2f + 1.
    pub fn quorum(&self) -> usize {
        2 * self.fault_bound + 1
    }

    /// f + 1: at least one correct replica is in any set this large.
    pub fn weak_quorum(&self) -> usize {
        self.fault_bound + 1
    }

    /// Primary of `view`.
    pub fn primary_for_view(&self, view: u64) -> ReplicaId {
        ReplicaId((view % self.replicas.len() as u64) as u16)
    }

    /// All members in order.
    pub fn replicas(&self) -> &[ReplicaInfo] {
        &self.replicas
    }

    /// Member ids in order.
    pub fn ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().map(|info| info.id)
    }

    /// Look up a member.
    pub fn replica(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(id.0 as usize)
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: ReplicaId) -> bool {
        (id.0 as usize) < self.replicas.len()
    }

    /// Identity of a member.
    pub fn identity_of(&self, id: ReplicaId) -> Option<PartyId> {
        self.replica(id).map(|info| info.identity)
    }
}
