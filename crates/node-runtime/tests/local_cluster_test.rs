//! Boots the local cluster the way the binary does and notarises through it.

use std::path::Path;
use std::time::Duration;

use node_runtime::{LocalCluster, NodeConfig};
use shared_crypto::Ed25519KeyPair;
use shared_types::{CommitRequest, NotaryError, ReplicaId, StateRef, TxId};
use tokio::sync::watch;

fn fast_config(data_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::parse(
        r#"
        [cluster]
        fault_bound = 1
        demo_requests = 0

        [replica]
        request_timeout_ms = 300
        view_change_timeout_ms = 300
        max_view_change_timeout_ms = 2000
        tick_interval_ms = 10
        checkpoint_interval = 4
        log_window = 16
        catch_up_timeout_ms = 200

        [client]
        round_timeout_ms = 2000
        max_attempts = 3
        backoff_base_ms = 20
        backoff_max_ms = 100
        "#,
    )
    .unwrap();
    config.cluster.data_dir = data_dir.to_path_buf();
    config.validate().unwrap();
    config
}

fn request(tx: u8, input: u8) -> CommitRequest {
    CommitRequest::signed(
        TxId([tx; 32]),
        vec![StateRef::new(TxId([input; 32]), 0)],
        &Ed25519KeyPair::from_seed([77; 32]),
    )
}

async fn stop(cluster: LocalCluster, shutdown: watch::Sender<bool>) {
    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), cluster.join())
        .await
        .expect("replicas did not stop");
}

#[tokio::test]
async fn test_cluster_notarises_and_refuses_double_spend() {
    let data = tempfile::tempdir().unwrap();
    let (shutdown, rx) = watch::channel(false);
    let cluster = LocalCluster::start(&fast_config(data.path()), rx).await.unwrap();
    assert_eq!(cluster.handles().len(), 4);

    let client = cluster.client();
    let result = client.notarise(request(1, 100)).await.unwrap();
    assert!(result.signature_count() >= cluster.cluster().quorum());

    let err = client.notarise(request(2, 100)).await.unwrap_err();
    assert!(matches!(err, NotaryError::Conflict(c) if c.consuming_tx == TxId([1; 32])));

    stop(cluster, shutdown).await;
}

#[tokio::test]
async fn test_consumed_states_survive_restart() {
    let data = tempfile::tempdir().unwrap();
    let config = fast_config(data.path());

    let (shutdown, rx) = watch::channel(false);
    let cluster = LocalCluster::start(&config, rx).await.unwrap();
    cluster.client().notarise(request(1, 100)).await.unwrap();
    stop(cluster, shutdown).await;

    let (shutdown, rx) = watch::channel(false);
    let cluster = LocalCluster::start(&config, rx).await.unwrap();
    let err = cluster.client().notarise(request(3, 100)).await.unwrap_err();
    assert!(matches!(err, NotaryError::Conflict(_)));
    stop(cluster, shutdown).await;
}

#[tokio::test]
async fn test_peer_directory_resolution_with_one_replica_down() {
    let data = tempfile::tempdir().unwrap();
    let peers = tempfile::tempdir().unwrap();
    let mut config = fast_config(data.path());
    config.cluster.peer_directory = Some(peers.path().to_path_buf());

    let (shutdown, rx) = watch::channel(false);
    let cluster = LocalCluster::start(&config, rx).await.unwrap();
    assert_eq!(std::fs::read_dir(peers.path()).unwrap().count(), 4);

    cluster.set_offline(ReplicaId(3), true);
    let result = cluster.client().notarise(request(5, 50)).await.unwrap();
    assert!(!result.signatures.contains_key(&ReplicaId(3)));

    stop(cluster, shutdown).await;
}
