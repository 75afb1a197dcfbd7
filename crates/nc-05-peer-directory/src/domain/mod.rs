//! Directory domain: node records, change events, snapshot diffing.

pub mod errors;

use std::collections::BTreeMap;

use shared_types::{PartyId, ReplicaId};

pub use errors::{DirectoryError, DirectoryResult};

/// One replica as published in the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: ReplicaId,
    pub address: String,
    pub identity: PartyId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// First sighting of a replica.
    Discovered(NodeInfo),
    /// A known replica changed address or identity.
    Updated(NodeInfo),
    /// The replica's file is gone.
    Removed(ReplicaId),
}

impl DirectoryEvent {
    pub fn replica(&self) -> ReplicaId {
        match self {
            DirectoryEvent::Discovered(info) | DirectoryEvent::Updated(info) => info.id,
            DirectoryEvent::Removed(id) => *id,
        }
    }
}

/// Events turning `old` into `new`, in replica order.
pub fn diff_snapshots(
    old: &BTreeMap<ReplicaId, NodeInfo>,
    new: &BTreeMap<ReplicaId, NodeInfo>,
) -> Vec<DirectoryEvent> {
    let mut events = Vec::new();
    for (id, info) in new {
        match old.get(id) {
            None => events.push(DirectoryEvent::Discovered(info.clone())),
            Some(previous) if previous != info => {
                events.push(DirectoryEvent::Updated(info.clone()))
            }
            Some(_) => {}
        }
    }
    events.extend(
        old.keys()
            .filter(|id| !new.contains_key(id))
            .map(|id| DirectoryEvent::Removed(*id)),
    );
    events.sort_by_key(DirectoryEvent::replica);
    events
}
