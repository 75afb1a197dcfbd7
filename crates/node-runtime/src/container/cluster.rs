//! # Local Cluster
//!
//! Holds every replica of an in-process cluster plus the client wired to
//! it.
//!
//! ## Startup order
//!
//! 1. Generate one Ed25519 identity per replica and build `ClusterConfig`
//! 2. Choose the address resolver (static table or peer directory)
//! 3. Open each replica's durable log and replay it into its store
//! 4. Spawn the replica services and register them with the transport
//! 5. Build the `NotaryClient`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nc_01_uniqueness_store::{FileDurableLog, UniquenessStore};
use nc_02_consensus::{
    InMemoryNetwork, LocalReplicaTransport, ReplicaDependencies, ReplicaHandle, ReplicaService,
    SystemTimeSource,
};
use nc_04_notary_client::NotaryClient;
use nc_05_peer_directory::{DirectoryAddressResolver, DirectoryWatcher, NodeInfo, NodeInfoFile};
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    AddressResolver, ClusterConfig, Ed25519IdentityVerifier, PartyId, ReplicaId, ReplicaInfo,
    StaticAddressResolver,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::NodeConfig;

/// How long startup waits for every replica to appear in the peer directory.
const DIRECTORY_WAIT: Duration = Duration::from_secs(10);
const DIRECTORY_POLL: Duration = Duration::from_millis(200);

pub struct LocalCluster {
    cluster: Arc<ClusterConfig>,
    network: Arc<InMemoryNetwork>,
    handles: Vec<ReplicaHandle>,
    client: Arc<NotaryClient>,
    tasks: Vec<JoinHandle<()>>,
    directory: Option<JoinHandle<()>>,
}

impl LocalCluster {
    /// Start all replicas. They stop when `shutdown` flips to true.
    pub async fn start(config: &NodeConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let size = config.cluster_size();
        let keys: Vec<Ed25519KeyPair> = (0..size).map(|_| Ed25519KeyPair::generate()).collect();
        let cluster = Arc::new(
            ClusterConfig::new(
                keys.iter()
                    .enumerate()
                    .map(|(i, key)| ReplicaInfo {
                        id: ReplicaId(i as u16),
                        identity: PartyId::of(key),
                        address: format!("local://replica-{}", i),
                    })
                    .collect(),
            )
            .context("Failed to build cluster configuration")?,
        );
        info!(
            "[node] cluster of {} replica(s), tolerating {} fault(s), quorum {}",
            cluster.size(),
            cluster.fault_bound(),
            cluster.quorum()
        );

        let (resolver, directory) = Self::resolver(config, &cluster).await?;
        let network = Arc::new(InMemoryNetwork::new(resolver, cluster.ids().collect()));
        let transport = Arc::new(LocalReplicaTransport::new(network.clone()));

        std::fs::create_dir_all(&config.cluster.data_dir).with_context(|| {
            format!("Failed to create {}", config.cluster.data_dir.display())
        })?;

        let replica_config = config.replica_config();
        let mut handles = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);
        for (i, keypair) in keys.into_iter().enumerate() {
            let id = ReplicaId(i as u16);
            let log_path = config.cluster.data_dir.join(format!("replica-{}.log", i));
            let log = FileDurableLog::open(&log_path)
                .with_context(|| format!("Failed to open {}", log_path.display()))?;
            let store = UniquenessStore::open(Arc::new(log), replica_config.shard_count)
                .with_context(|| format!("Failed to replay {}", log_path.display()))?;
            info!("[node] {} recovered {} consumed state(s)", id, store.len());

            let deps = ReplicaDependencies {
                id,
                keypair,
                cluster: cluster.clone(),
                store: Arc::new(store),
                verifier: Arc::new(Ed25519IdentityVerifier),
                network: network.clone(),
                inbox: network.register(id).context("Failed to open replica inbox")?,
                clock: Arc::new(SystemTimeSource::new()),
                config: replica_config.clone(),
            };
            let (handle, task) = ReplicaService::spawn(deps, shutdown.clone())
                .with_context(|| format!("Failed to start {}", id))?;
            transport
                .register(handle.clone())
                .context("Failed to register replica with the transport")?;
            handles.push(handle);
            tasks.push(task);
        }

        let client = NotaryClient::new(
            cluster.clone(),
            transport,
            Arc::new(Ed25519IdentityVerifier),
            config.client_config(),
        )
        .context("Invalid client configuration")?;

        Ok(Self {
            cluster,
            network,
            handles,
            client: Arc::new(client),
            tasks,
            directory,
        })
    }

    /// Static addresses, or addresses published in the peer directory.
    async fn resolver(
        config: &NodeConfig,
        cluster: &Arc<ClusterConfig>,
    ) -> Result<(Arc<dyn AddressResolver>, Option<JoinHandle<()>>)> {
        let Some(dir) = &config.cluster.peer_directory else {
            return Ok((Arc::new(StaticAddressResolver::from_cluster(cluster)), None));
        };

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for info in cluster.replicas() {
            let node = NodeInfo {
                id: info.id,
                address: info.address.clone(),
                identity: info.identity,
            };
            NodeInfoFile::store(dir.join(format!("replica-{}.toml", info.id.0)), &node)
                .context("Failed to publish node info")?;
        }

        let watcher = DirectoryWatcher::new(dir).with_interval(DIRECTORY_POLL);
        let (resolver, task) = DirectoryAddressResolver::spawn(&watcher, cluster.clone());
        if !resolver.wait_for(cluster.size(), DIRECTORY_WAIT).await {
            bail!(
                "only {} of {} replica(s) appeared in {}",
                resolver.len(),
                cluster.size(),
                dir.display()
            );
        }
        info!("[node] addresses resolved through {}", dir.display());
        Ok((Arc::new(resolver), Some(task)))
    }

    pub fn cluster(&self) -> &Arc<ClusterConfig> {
        &self.cluster
    }

    pub fn client(&self) -> Arc<NotaryClient> {
        self.client.clone()
    }

    pub fn handles(&self) -> &[ReplicaHandle] {
        &self.handles
    }

    /// Simulate a crash or recovery of `replica`.
    pub fn set_offline(&self, replica: ReplicaId, offline: bool) {
        self.network.set_offline(replica, offline);
    }

    /// Wait for the replica tasks after shutdown was signalled, then stop
    /// the directory watch.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[node] replica task ended abnormally: {}", e);
            }
        }
        if let Some(directory) = self.directory {
            directory.abort();
        }
    }
}
