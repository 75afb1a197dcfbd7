//! # Notary Client
//!
//! Runs the notarisation flow for one request at a time per call; calls
//! may run concurrently.
//!
//! Each round dispatches the request to replicas in parallel and feeds the
//! answers into a `SignatureAggregator` until a quorum of identical votes
//! forms, f+1 replicas reject the request, or the round times out. Later
//! rounds only contact replicas that have not answered yet, after an
//! exponential backoff.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use nc_03_signature_aggregation::{SignatureAggregator, VoteStatus};
use shared_types::{
    AggregatedResult, ClusterConfig, CommitRequest, ConflictReporter, IdentityVerifier,
    NotaryError, NotaryResult, ReplicaId, ReplicaResponse, ReplicaTransport,
};
use tracing::{debug, info, warn};

use crate::domain::{CancelToken, ClientConfig, ClientConfigError, Flow, FlowState};

pub struct NotaryClient {
    cluster: Arc<ClusterConfig>,
    transport: Arc<dyn ReplicaTransport>,
    verifier: Arc<dyn IdentityVerifier>,
    config: ClientConfig,
}

/// How one round ended.
enum RoundEnd {
    Quorum(AggregatedResult),
    Invalid(String),
    Cancelled,
    Exhausted,
}

impl NotaryClient {
    pub fn new(
        cluster: Arc<ClusterConfig>,
        transport: Arc<dyn ReplicaTransport>,
        verifier: Arc<dyn IdentityVerifier>,
        config: ClientConfig,
    ) -> Result<Self, ClientConfigError> {
        config.validate(&cluster)?;
        Ok(Self {
            cluster,
            transport,
            verifier,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Notarise `request`: its quorum proof on success, the conflict on a
    /// double spend.
    pub async fn notarise(&self, request: CommitRequest) -> NotaryResult<AggregatedResult> {
        self.notarise_with_cancel(request, &CancelToken::new()).await
    }

    pub async fn notarise_with_cancel(
        &self,
        request: CommitRequest,
        cancel: &CancelToken,
    ) -> NotaryResult<AggregatedResult> {
        let mut flow = Flow::new(request.tx_id);
        self.run_flow(&mut flow, request, cancel).await
    }

    /// Drive `flow` to a terminal state.
    pub async fn run_flow(
        &self,
        flow: &mut Flow,
        request: CommitRequest,
        cancel: &CancelToken,
    ) -> NotaryResult<AggregatedResult> {
        let tx_id = request.tx_id;
        if let Err(e) = request.validate_structure() {
            info!("[nc-04] {} rejected locally: {}", tx_id, e);
            step(flow, FlowState::Failed)?;
            return Err(e);
        }

        let mut aggregator =
            SignatureAggregator::new(tx_id, self.cluster.clone(), self.verifier.clone());
        let mut answered: BTreeSet<ReplicaId> = BTreeSet::new();
        let mut rejections: BTreeMap<ReplicaId, String> = BTreeMap::new();
        let mut last_failure = String::from("no replica answered");

        for attempt in 1..=self.config.max_attempts {
            let targets = self.targets(attempt, &answered);
            step(flow, FlowState::Dispatched)?;
            debug!("[nc-04] {} round {} to {:?}", tx_id, attempt, targets);
            step(flow, FlowState::AwaitingQuorum)?;

            let end = self
                .round(
                    &request,
                    &targets,
                    &mut aggregator,
                    &mut answered,
                    &mut rejections,
                    &mut last_failure,
                    cancel,
                )
                .await;

            match end {
                RoundEnd::Quorum(result) => {
                    return match ConflictReporter::from_decision(tx_id, &result.decision) {
                        None => {
                            step(flow, FlowState::Succeeded)?;
                            info!(
                                "[nc-04] {} notarised with {} signature(s)",
                                tx_id,
                                result.signature_count()
                            );
                            Ok(result)
                        }
                        Some(conflict) => {
                            step(flow, FlowState::Conflicted)?;
                            info!("[nc-04] {} conflicted: {}", tx_id, conflict);
                            Err(conflict)
                        }
                    };
                }
                RoundEnd::Invalid(reason) => {
                    step(flow, FlowState::Failed)?;
                    info!("[nc-04] {} invalid: {}", tx_id, reason);
                    return Err(NotaryError::TransactionInvalid { reason });
                }
                RoundEnd::Cancelled => return self.cancelled(flow),
                RoundEnd::Exhausted => {}
            }

            if attempt < self.config.max_attempts {
                let pause = self.config.backoff(attempt);
                warn!(
                    "[nc-04] {} no quorum in round {}, retrying in {:?}",
                    tx_id, attempt, pause
                );
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => return self.cancelled(flow),
                }
            }
        }

        step(flow, FlowState::Failed)?;
        warn!(
            "[nc-04] {} unavailable after {} attempt(s): {}",
            tx_id, self.config.max_attempts, last_failure
        );
        Err(NotaryError::Unavailable {
            attempts: self.config.max_attempts,
            reason: last_failure,
        })
    }

    /// Replicas to contact in round `attempt`.
    fn targets(&self, attempt: u32, answered: &BTreeSet<ReplicaId>) -> Vec<ReplicaId> {
        let all = self.cluster.ids();
        if attempt == 1 {
            let limit = self.config.dispatch_subset.unwrap_or(self.cluster.size());
            all.take(limit).collect()
        } else {
            all.filter(|r| !answered.contains(r)).collect()
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn round(
        &self,
        request: &CommitRequest,
        targets: &[ReplicaId],
        aggregator: &mut SignatureAggregator,
        answered: &mut BTreeSet<ReplicaId>,
        rejections: &mut BTreeMap<ReplicaId, String>,
        last_failure: &mut String,
        cancel: &CancelToken,
    ) -> RoundEnd {
        let mut calls: FuturesUnordered<_> = targets
            .iter()
            .map(|replica| {
                let transport = self.transport.clone();
                let request = request.clone();
                let replica = *replica;
                async move { (replica, transport.submit(replica, request).await) }
            })
            .collect();

        let deadline = tokio::time::sleep(self.config.round_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return RoundEnd::Cancelled,
                _ = &mut deadline => {
                    *last_failure = format!("round timed out after {:?}", self.config.round_timeout);
                    return RoundEnd::Exhausted;
                }
                next = calls.next() => {
                    let Some((replica, answer)) = next else {
                        return RoundEnd::Exhausted;
                    };
                    match answer {
                        Ok(ReplicaResponse::Vote(vote)) => {
                            answered.insert(replica);
                            if let Ok(VoteStatus::QuorumReached(proof)) = aggregator.add_vote(vote) {
                                return RoundEnd::Quorum(proof.into_result());
                            }
                        }
                        Ok(ReplicaResponse::Invalid { reason, .. }) => {
                            answered.insert(replica);
                            debug!("[nc-04] replica {} rejected {}: {}", replica, request.tx_id, reason);
                            rejections.insert(replica, reason.clone());
                            if rejections.len() >= self.cluster.weak_quorum() {
                                return RoundEnd::Invalid(reason);
                            }
                        }
                        Ok(ReplicaResponse::Unavailable { reason, .. }) => {
                            debug!("[nc-04] replica {} unavailable: {}", replica, reason);
                            *last_failure = format!("replica {} unavailable: {}", replica, reason);
                        }
                        Err(e) => {
                            debug!("[nc-04] replica {} unreachable: {}", replica, e);
                            *last_failure = e.to_string();
                        }
                    }
                }
            }
        }
    }

    fn cancelled(&self, flow: &mut Flow) -> NotaryResult<AggregatedResult> {
        info!("[nc-04] {} cancelled by caller", flow.tx_id());
        step(flow, FlowState::Failed)?;
        Err(NotaryError::Cancelled)
    }
}

fn step(flow: &mut Flow, to: FlowState) -> NotaryResult<()> {
    flow.transition(to).map_err(|e| NotaryError::Internal {
        reason: e.to_string(),
    })
}
