//! In-process peer network.
//!
//! Routes envelopes between replicas running in one process over bounded
//! tokio channels, keyed by the address the resolver reports. Replicas can
//! be taken offline to simulate crashes and partitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{AddressResolver, ReplicaId, TransportError};
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::Envelope;
use crate::ports::PeerNetwork;

/// Default per-replica inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 4096;

pub struct InMemoryNetwork {
    resolver: Arc<dyn AddressResolver>,
    members: Vec<ReplicaId>,
    inboxes: RwLock<HashMap<String, mpsc::Sender<Envelope>>>,
    offline: RwLock<HashSet<ReplicaId>>,
    capacity: usize,
}

impl InMemoryNetwork {
    pub fn new(resolver: Arc<dyn AddressResolver>, members: Vec<ReplicaId>) -> Self {
        Self::with_capacity(resolver, members, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(
        resolver: Arc<dyn AddressResolver>,
        members: Vec<ReplicaId>,
        capacity: usize,
    ) -> Self {
        Self {
            resolver,
            members,
            inboxes: RwLock::new(HashMap::new()),
            offline: RwLock::new(HashSet::new()),
            capacity,
        }
    }

    /// Open the inbox for `replica` at its resolved address.
    ///
    /// Registering again replaces the previous inbox.
    pub fn register(&self, replica: ReplicaId) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        let address = self.address_of(replica)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.write().insert(address, tx);
        Ok(rx)
    }

    /// Drop all traffic to and from `replica`.
    pub fn set_offline(&self, replica: ReplicaId, offline: bool) {
        let mut set = self.offline.write();
        if offline {
            set.insert(replica);
        } else {
            set.remove(&replica);
        }
    }

    pub fn is_offline(&self, replica: ReplicaId) -> bool {
        self.offline.read().contains(&replica)
    }

    /// Current address of `replica`.
    pub fn address_of(&self, replica: ReplicaId) -> Result<String, TransportError> {
        self.resolver
            .resolve_replica(replica)
            .ok_or(TransportError::UnknownReplica { replica: replica.0 })
    }
}

impl PeerNetwork for InMemoryNetwork {
    fn send(&self, from: ReplicaId, to: ReplicaId, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_offline(from) || self.is_offline(to) {
            trace!("[nc-02] dropping {} {} -> {}", envelope.payload.kind(), from, to);
            return Ok(());
        }
        let address = self.address_of(to)?;
        let inbox = self
            .inboxes
            .read()
            .get(&address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable {
                replica: to.0,
                reason: format!("nothing listening at {}", address),
            })?;
        inbox.try_send(envelope).map_err(|e| TransportError::Unreachable {
            replica: to.0,
            reason: e.to_string(),
        })
    }

    fn broadcast(&self, from: ReplicaId, envelope: Envelope) {
        for to in self.members.iter().copied().filter(|r| *r != from) {
            if let Err(e) = self.send(from, to, envelope.clone()) {
                trace!("[nc-02] broadcast to {} failed: {}", to, e);
            }
        }
    }
}
