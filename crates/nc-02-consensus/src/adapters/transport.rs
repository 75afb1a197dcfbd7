//! Client transport to in-process replicas.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{CommitRequest, ReplicaId, ReplicaResponse, ReplicaTransport, TransportError};

use super::network::InMemoryNetwork;
use crate::service::ReplicaHandle;

/// `ReplicaTransport` over replica handles in the same process.
///
/// Handles are listed under the address the replica resolves to, and the
/// offline set of the peer network is shared, so a crashed replica is
/// unreachable for clients and peers alike.
pub struct LocalReplicaTransport {
    network: Arc<InMemoryNetwork>,
    handles: RwLock<HashMap<String, ReplicaHandle>>,
}

impl LocalReplicaTransport {
    pub fn new(network: Arc<InMemoryNetwork>) -> Self {
        Self {
            network,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, handle: ReplicaHandle) -> Result<(), TransportError> {
        let address = self.network.address_of(handle.id())?;
        self.handles.write().insert(address, handle);
        Ok(())
    }
}

#[async_trait]
impl ReplicaTransport for LocalReplicaTransport {
    async fn submit(
        &self,
        replica: ReplicaId,
        request: CommitRequest,
    ) -> Result<ReplicaResponse, TransportError> {
        if self.network.is_offline(replica) {
            return Err(TransportError::Unreachable {
                replica: replica.0,
                reason: "replica offline".into(),
            });
        }
        let address = self.network.address_of(replica)?;
        let handle = self
            .handles
            .read()
            .get(&address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable {
                replica: replica.0,
                reason: format!("no replica serving {}", address),
            })?;
        handle.submit(request).await
    }
}
