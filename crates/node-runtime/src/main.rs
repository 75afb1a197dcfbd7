//! # Notary Node Runtime
//!
//! Boots a local notary cluster.
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`RUST_LOG`, default `info`)
//! 2. Load configuration (defaults, `NC_CONFIG` file, `NC_*` environment)
//! 3. Start the replicas and the client
//! 4. Notarise the configured number of sample requests
//! 5. Run until Ctrl+C, then shut down gracefully

use std::time::Duration;

use anyhow::{Context, Result};
use node_runtime::{LocalCluster, NodeConfig};
use shared_crypto::{sha256_many, Ed25519KeyPair};
use shared_types::{CommitRequest, NotaryError, StateRef, TxId};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Bound on the graceful shutdown of the replica tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct NodeRuntime {
    cluster: LocalCluster,
    config: NodeConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeRuntime {
    async fn start(config: NodeConfig) -> Result<Self> {
        info!("===========================================");
        info!("  Notary Node Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cluster = LocalCluster::start(&config, shutdown_rx)
            .await
            .context("Failed to start local cluster")?;

        info!("Data Dir: {}", config.cluster.data_dir.display());
        Ok(Self {
            cluster,
            config,
            shutdown_tx,
        })
    }

    /// Notarise a few sample transactions, then try to spend the first
    /// one's input again.
    async fn run_demo(&self) {
        let count = self.config.cluster.demo_requests;
        if count == 0 {
            return;
        }
        let client = self.cluster.client();
        let requester = Ed25519KeyPair::generate();
        let nonce = std::process::id().to_le_bytes();
        let input = |i: usize| StateRef::new(demo_id(b"genesis", &nonce, i), 0);

        for i in 0..count {
            let tx_id = demo_id(b"demo-tx", &nonce, i);
            let request = CommitRequest::signed(tx_id, vec![input(i)], &requester);
            match client.notarise(request).await {
                Ok(result) => info!(
                    "[node] {} notarised by {} replica(s)",
                    tx_id,
                    result.signature_count()
                ),
                Err(e) => warn!("[node] {} failed: {}", tx_id, e),
            }
        }

        let double_spend = CommitRequest::signed(
            demo_id(b"double-spend", &nonce, 0),
            vec![input(0)],
            &requester,
        );
        match client.notarise(double_spend).await {
            Err(NotaryError::Conflict(conflict)) => {
                info!("[node] double spend refused: {}", conflict)
            }
            Ok(_) => error!("[node] double spend was notarised"),
            Err(e) => warn!("[node] double spend attempt failed: {}", e),
        }
    }

    async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.cluster.join())
            .await
            .is_err()
        {
            warn!("Replicas did not stop within {:?}", SHUTDOWN_GRACE);
        }
        info!("Shutdown complete");
    }
}

fn demo_id(tag: &[u8], nonce: &[u8], i: usize) -> TxId {
    TxId(sha256_many(&[tag, nonce, &i.to_le_bytes()]))
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = NodeConfig::load().context("Failed to load configuration")?;
    let runtime = NodeRuntime::start(config).await?;
    runtime.run_demo().await;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
