use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use shared_types::{AddressResolver, ClusterConfig, ReplicaId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::watcher::DirectoryWatcher;
use crate::domain::{DirectoryEvent, NodeInfo};

/// `AddressResolver` fed by a `DirectoryWatcher`.
///
/// Entries whose identity differs from the one in the cluster
/// configuration are ignored.
#[derive(Clone)]
pub struct DirectoryAddressResolver {
    nodes: Arc<RwLock<BTreeMap<ReplicaId, NodeInfo>>>,
    known: watch::Receiver<usize>,
}

impl DirectoryAddressResolver {
    /// Start following `watcher`. The task ends when the watch stream does.
    pub fn spawn(
        watcher: &DirectoryWatcher,
        cluster: Arc<ClusterConfig>,
    ) -> (Self, JoinHandle<()>) {
        let nodes = Arc::new(RwLock::new(BTreeMap::new()));
        let (count_tx, count_rx) = watch::channel(0usize);
        let mut events = watcher.watch();

        let task_nodes = nodes.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let count = apply(&task_nodes, &cluster, event);
                count_tx.send_replace(count);
            }
        });

        (
            Self {
                nodes,
                known: count_rx,
            },
            handle,
        )
    }

    pub fn node(&self, replica: ReplicaId) -> Option<NodeInfo> {
        self.nodes.read().get(&replica).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` replicas are resolvable.
    ///
    /// Returns false if `timeout` passes first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let mut known = self.known.clone();
        let reached = matches!(
            tokio::time::timeout(timeout, known.wait_for(|n| *n >= count)).await,
            Ok(Ok(_))
        );
        reached
    }
}

fn apply(
    nodes: &RwLock<BTreeMap<ReplicaId, NodeInfo>>,
    cluster: &ClusterConfig,
    event: DirectoryEvent,
) -> usize {
    let mut nodes = nodes.write();
    match event {
        DirectoryEvent::Discovered(info) | DirectoryEvent::Updated(info) => {
            match cluster.identity_of(info.id) {
                Some(identity) if identity == info.identity => {
                    info!("[nc-05] {} at {}", info.id, info.address);
                    nodes.insert(info.id, info);
                }
                Some(_) => {
                    warn!("[nc-05] {} published a foreign identity, ignored", info.id);
                    nodes.remove(&info.id);
                }
                None => warn!("[nc-05] {} is not a cluster member, ignored", info.id),
            }
        }
        DirectoryEvent::Removed(id) => {
            info!("[nc-05] {} left the directory", id);
            nodes.remove(&id);
        }
    }
    nodes.len()
}

impl AddressResolver for DirectoryAddressResolver {
    fn resolve_replica(&self, replica: ReplicaId) -> Option<String> {
        self.nodes.read().get(&replica).map(|n| n.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NodeInfoFile;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::{PartyId, ReplicaInfo};

    const FAST: Duration = Duration::from_millis(20);

    fn keys() -> Vec<Ed25519KeyPair> {
        (0..4u8).map(|i| Ed25519KeyPair::from_seed([i + 1; 32])).collect()
    }

    fn cluster(keys: &[Ed25519KeyPair]) -> Arc<ClusterConfig> {
        Arc::new(
            ClusterConfig::new(
                keys.iter()
                    .enumerate()
                    .map(|(i, k)| ReplicaInfo {
                        id: ReplicaId(i as u16),
                        identity: PartyId::of(k),
                        address: format!("static://{}", i),
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn publish(dir: &std::path::Path, id: u16, address: &str, key: &Ed25519KeyPair) {
        let info = NodeInfo {
            id: ReplicaId(id),
            address: address.to_string(),
            identity: PartyId::of(key),
        };
        NodeInfoFile::store(dir.join(format!("n{}.toml", id)), &info).unwrap();
    }

    #[tokio::test]
    async fn test_resolves_published_members() {
        let dir = tempfile::tempdir().unwrap();
        let keys = keys();
        for (i, key) in keys.iter().enumerate() {
            publish(dir.path(), i as u16, &format!("10.0.0.{}:7000", i), key);
        }

        let watcher = DirectoryWatcher::new(dir.path()).with_interval(FAST);
        let (resolver, _task) = DirectoryAddressResolver::spawn(&watcher, cluster(&keys));

        assert!(resolver.wait_for(4, Duration::from_secs(5)).await);
        assert_eq!(
            resolver.resolve_replica(ReplicaId(2)),
            Some("10.0.0.2:7000".to_string())
        );
    }

    #[tokio::test]
    async fn test_foreign_identity_and_non_member_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let keys = keys();
        publish(dir.path(), 0, "good:1", &keys[0]);
        publish(dir.path(), 1, "impostor:1", &Ed25519KeyPair::from_seed([99; 32]));
        publish(dir.path(), 9, "stranger:1", &keys[3]);

        let watcher = DirectoryWatcher::new(dir.path()).with_interval(FAST);
        let (resolver, _task) = DirectoryAddressResolver::spawn(&watcher, cluster(&keys));

        assert!(resolver.wait_for(1, Duration::from_secs(5)).await);
        // Give the watcher a few more polls.
        tokio::time::sleep(FAST * 5).await;
        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.resolve_replica(ReplicaId(1)), None);
        assert_eq!(resolver.resolve_replica(ReplicaId(9)), None);
    }

    #[tokio::test]
    async fn test_removed_file_stops_resolving() {
        let dir = tempfile::tempdir().unwrap();
        let keys = keys();
        publish(dir.path(), 0, "a:1", &keys[0]);
        publish(dir.path(), 1, "b:1", &keys[1]);

        let watcher = DirectoryWatcher::new(dir.path()).with_interval(FAST);
        let (resolver, _task) = DirectoryAddressResolver::spawn(&watcher, cluster(&keys));
        assert!(resolver.wait_for(2, Duration::from_secs(5)).await);

        std::fs::remove_file(dir.path().join("n1.toml")).unwrap();
        for _ in 0..250 {
            if resolver.resolve_replica(ReplicaId(1)).is_none() {
                break;
            }
            tokio::time::sleep(FAST).await;
        }
        assert_eq!(resolver.resolve_replica(ReplicaId(1)), None);
        assert!(resolver.node(ReplicaId(0)).is_some());
    }
}
