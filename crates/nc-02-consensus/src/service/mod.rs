//! # Replica Service
//!
//! Runs a `ReplicaCore` on a tokio task. One loop owns the core and
//! multiplexes peer traffic, client submissions, the protocol timer and the
//! shutdown signal, then carries out the core's effects.

use std::collections::HashMap;
use std::sync::Arc;

use nc_01_uniqueness_store::UniquenessStore;
use shared_crypto::{Digest32, Ed25519KeyPair};
use shared_types::{
    ClusterConfig, CommitRequest, IdentityVerifier, ReplicaId, ReplicaResponse, TransportError,
    TxId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::domain::{ClientOutcome, ConsensusResult, Effect, Envelope, ReplicaConfig, ReplicaCore};
use crate::ports::{PeerNetwork, TimeSource};

/// Capacity of the client submission queue.
const CLIENT_QUEUE: usize = 1024;

/// Everything a replica task needs.
pub struct ReplicaDependencies {
    pub id: ReplicaId,
    pub keypair: Ed25519KeyPair,
    pub cluster: Arc<ClusterConfig>,
    pub store: Arc<UniquenessStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub network: Arc<dyn PeerNetwork>,
    /// Envelopes addressed to this replica.
    pub inbox: mpsc::Receiver<Envelope>,
    pub clock: Arc<dyn TimeSource>,
    pub config: ReplicaConfig,
}

struct ClientCall {
    request: CommitRequest,
    reply: oneshot::Sender<ReplicaResponse>,
}

/// A client blocked on the decision for its request.
struct Waiter {
    request: Digest32,
    reply: oneshot::Sender<ReplicaResponse>,
}

/// Client-side handle to a running replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    id: ReplicaId,
    calls: mpsc::Sender<ClientCall>,
}

impl ReplicaHandle {
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Submit a request and wait until the replica has an answer.
    pub async fn submit(&self, request: CommitRequest) -> Result<ReplicaResponse, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.calls
            .send(ClientCall { request, reply })
            .await
            .map_err(|_| self.stopped())?;
        answer.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> TransportError {
        TransportError::Unreachable {
            replica: self.id.0,
            reason: "replica stopped".into(),
        }
    }
}

pub struct ReplicaService {
    core: ReplicaCore,
    network: Arc<dyn PeerNetwork>,
    clock: Arc<dyn TimeSource>,
    waiters: HashMap<TxId, Vec<Waiter>>,
}

impl ReplicaService {
    /// Start the replica loop; it runs until `shutdown` flips or is dropped.
    pub fn spawn(
        deps: ReplicaDependencies,
        shutdown: watch::Receiver<bool>,
    ) -> ConsensusResult<(ReplicaHandle, JoinHandle<()>)> {
        let ReplicaDependencies {
            id,
            keypair,
            cluster,
            store,
            verifier,
            network,
            inbox,
            clock,
            config,
        } = deps;
        let tick_interval = config.tick_interval;
        let core = ReplicaCore::new(id, keypair, cluster, verifier, store, config)?;

        let (calls, call_rx) = mpsc::channel(CLIENT_QUEUE);
        let service = Self {
            core,
            network,
            clock,
            waiters: HashMap::new(),
        };
        let task = tokio::spawn(service.run(inbox, call_rx, tick_interval, shutdown));
        Ok((ReplicaHandle { id, calls }, task))
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Envelope>,
        mut calls: mpsc::Receiver<ClientCall>,
        tick_interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let id = self.core.id();
        info!("[nc-02] Replica {} started", id);
        self.core.start(self.clock.now_millis());
        self.flush();

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(envelope) = inbox.recv() => {
                    let kind = envelope.payload.kind();
                    let sender = envelope.sender;
                    if let Err(e) = self.core.on_message(envelope, self.clock.now_millis()) {
                        debug!("[nc-02] {} rejected {} from {}: {}", id, kind, sender, e);
                    }
                }
                Some(call) = calls.recv() => {
                    self.on_call(call);
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.core.on_tick(self.clock.now_millis()) {
                        debug!("[nc-02] {} tick: {}", id, e);
                    }
                    self.prune_waiters();
                }
                _ = shutdown.changed() => {
                    info!("[nc-02] Replica {} shutdown signal received", id);
                    break;
                }
            }
            self.flush();
        }
    }

    fn on_call(&mut self, call: ClientCall) {
        let id = self.core.id();
        let tx_id = call.request.tx_id;
        let request = call.request.content_digest();
        let response = match self.core.on_client_request(call.request, self.clock.now_millis()) {
            ClientOutcome::Decided(vote) => ReplicaResponse::Vote(vote),
            ClientOutcome::Rejected(reason) => ReplicaResponse::Invalid { replica: id, reason },
            ClientOutcome::Unavailable(reason) => ReplicaResponse::Unavailable { replica: id, reason },
            ClientOutcome::Pending => {
                self.waiters.entry(tx_id).or_default().push(Waiter {
                    request,
                    reply: call.reply,
                });
                return;
            }
        };
        let _ = call.reply.send(response);
    }

    fn flush(&mut self) {
        let id = self.core.id();
        for effect in self.core.drain_effects() {
            match effect {
                Effect::Broadcast(envelope) => self.network.broadcast(id, envelope),
                Effect::Send(to, envelope) => {
                    if let Err(e) = self.network.send(id, to, envelope) {
                        debug!("[nc-02] {} send to {} failed: {}", id, to, e);
                    }
                }
                Effect::Decided { request, vote } => {
                    for waiter in self.waiters.remove(&vote.tx_id).unwrap_or_default() {
                        let response = if waiter.request == request {
                            ReplicaResponse::Vote(vote.clone())
                        } else {
                            ReplicaResponse::Invalid {
                                replica: id,
                                reason: format!(
                                    "transaction {} was decided with different inputs",
                                    vote.tx_id
                                ),
                            }
                        };
                        let _ = waiter.reply.send(response);
                    }
                }
            }
        }

        if self.core.is_halted() && !self.waiters.is_empty() {
            error!("[nc-02] Replica {} halted, failing {} waiting request(s)", id, self.waiters.len());
            for (_, waiters) in self.waiters.drain() {
                for waiter in waiters {
                    let _ = waiter.reply.send(ReplicaResponse::Unavailable {
                        replica: id,
                        reason: "replica halted".into(),
                    });
                }
            }
        }
    }

    /// Forget waiters whose client stopped listening.
    fn prune_waiters(&mut self) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|w| !w.reply.is_closed());
            !waiters.is_empty()
        });
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }
}
