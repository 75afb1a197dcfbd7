//! # Cluster Harness
//!
//! Starts `3f + 1` replica services with in-memory logs, keeps a handle on
//! every store so tests can inspect what each replica committed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nc_01_uniqueness_store::{InMemoryDurableLog, UniquenessStore};
use nc_02_consensus::{
    InMemoryNetwork, LocalReplicaTransport, ReplicaConfig, ReplicaDependencies, ReplicaService,
    SystemTimeSource,
};
use nc_04_notary_client::{CancelToken, ClientConfig, NotaryClient};
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    ClusterConfig, CommitRequest, ConsumingRecord, Ed25519IdentityVerifier, PartyId, ReplicaId,
    ReplicaInfo, ReplicaResponse, ReplicaTransport, StateRef, StaticAddressResolver,
    TransportError, TxId,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ClusterHarness {
    pub cluster: Arc<ClusterConfig>,
    pub network: Arc<InMemoryNetwork>,
    pub transport: Arc<LocalReplicaTransport>,
    pub stores: Vec<Arc<UniquenessStore>>,
    requester: Ed25519KeyPair,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterHarness {
    /// Start a cluster tolerating `fault_bound` faults.
    pub fn start(fault_bound: usize) -> Self {
        let size = 3 * fault_bound + 1;
        let keys: Vec<_> = (0..size)
            .map(|i| Ed25519KeyPair::from_seed([i as u8 + 1; 32]))
            .collect();
        let cluster = Arc::new(
            ClusterConfig::new(
                keys.iter()
                    .enumerate()
                    .map(|(i, k)| ReplicaInfo {
                        id: ReplicaId(i as u16),
                        identity: PartyId::of(k),
                        address: format!("local://{}", i),
                    })
                    .collect(),
            )
            .unwrap(),
        );
        let network = Arc::new(InMemoryNetwork::new(
            Arc::new(StaticAddressResolver::from_cluster(&cluster)),
            cluster.ids().collect(),
        ));
        let transport = Arc::new(LocalReplicaTransport::new(network.clone()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut stores = Vec::new();
        let mut tasks = Vec::new();
        for (i, keypair) in keys.into_iter().enumerate() {
            let id = ReplicaId(i as u16);
            let store = Arc::new(
                UniquenessStore::open(Arc::new(InMemoryDurableLog::new()), 4).unwrap(),
            );
            let deps = ReplicaDependencies {
                id,
                keypair,
                cluster: cluster.clone(),
                store: store.clone(),
                verifier: Arc::new(Ed25519IdentityVerifier),
                network: network.clone(),
                inbox: network.register(id).unwrap(),
                clock: Arc::new(SystemTimeSource::new()),
                config: ReplicaConfig::for_testing(),
            };
            let (handle, task) = ReplicaService::spawn(deps, shutdown_rx.clone()).unwrap();
            transport.register(handle).unwrap();
            stores.push(store);
            tasks.push(task);
        }

        Self {
            cluster,
            network,
            transport,
            stores,
            requester: Ed25519KeyPair::from_seed([200; 32]),
            shutdown,
            tasks,
        }
    }

    pub fn client(&self, config: ClientConfig) -> NotaryClient {
        self.client_over(self.transport.clone(), config)
    }

    pub fn client_over(
        &self,
        transport: Arc<dyn ReplicaTransport>,
        config: ClientConfig,
    ) -> NotaryClient {
        NotaryClient::new(
            self.cluster.clone(),
            transport,
            Arc::new(Ed25519IdentityVerifier),
            config,
        )
        .unwrap()
    }

    /// Request for transaction `[tx; 32]` consuming `state(i)` for each `i`.
    pub fn request(&self, tx: u8, inputs: &[u8]) -> CommitRequest {
        CommitRequest::signed(
            TxId([tx; 32]),
            inputs.iter().map(|i| Self::state(*i)).collect(),
            &self.requester,
        )
    }

    pub fn state(i: u8) -> StateRef {
        StateRef::new(TxId([i; 32]), u32::from(i))
    }

    pub fn requester(&self) -> PartyId {
        PartyId::of(&self.requester)
    }

    pub fn set_offline(&self, replica: u16, offline: bool) {
        self.network.set_offline(ReplicaId(replica), offline);
    }

    /// The record for `state_ref` on each replica.
    pub fn records(&self, state_ref: &StateRef) -> Vec<Option<ConsumingRecord>> {
        self.stores.iter().map(|s| s.get(state_ref)).collect()
    }

    pub fn total_records(&self) -> usize {
        self.stores.iter().map(|s| s.len()).sum()
    }

    /// Poll until `check` holds or five seconds pass.
    pub async fn eventually<F>(&self, check: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        for _ in 0..500 {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

/// Transport wrapper counting submissions.
pub struct CountingTransport {
    inner: Arc<dyn ReplicaTransport>,
    calls: AtomicUsize,
}

impl CountingTransport {
    pub fn new(inner: Arc<dyn ReplicaTransport>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaTransport for CountingTransport {
    async fn submit(
        &self,
        replica: ReplicaId,
        request: CommitRequest,
    ) -> Result<ReplicaResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(replica, request).await
    }
}

/// Transport that hands every submission to a detached task, so it reaches
/// the replica even if the client drops the call, then fires `cancel`.
pub struct CancellingTransport {
    inner: Arc<dyn ReplicaTransport>,
    cancel: CancelToken,
}

impl CancellingTransport {
    pub fn new(inner: Arc<dyn ReplicaTransport>, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }
}

#[async_trait]
impl ReplicaTransport for CancellingTransport {
    async fn submit(
        &self,
        replica: ReplicaId,
        request: CommitRequest,
    ) -> Result<ReplicaResponse, TransportError> {
        let inner = self.inner.clone();
        let call = tokio::spawn(async move { inner.submit(replica, request).await });
        self.cancel.cancel();
        call.await.map_err(|e| TransportError::Unreachable {
            replica: replica.0,
            reason: e.to_string(),
        })?
    }
}
