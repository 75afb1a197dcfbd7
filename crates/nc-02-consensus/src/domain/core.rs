//! # Replica Core
//!
//! PBFT-style agreement on the order of commit requests.
//!
//! ## Normal operation
//!
//! ```text
//! client ──request──→ backup ──Forward──→ primary
//!                                            │ PrePrepare(view, seq, entry)
//!                      every replica ←───────┘
//!                      Prepare(view, seq, digest)   2f+1 → prepared
//!                      Commit(view, seq, digest)    2f+1 → committed
//!                      execute in seq order against the uniqueness store
//! ```
//!
//! ## Recovery
//!
//! - **Checkpoints**: every `checkpoint_interval` executions; 2f+1 matching
//!   make a checkpoint stable and prune protocol state below it.
//! - **View change**: a request stuck past `request_timeout` moves the
//!   replica to the next view. The new primary gathers 2f+1 view changes and
//!   every replica derives the same re-proposals from them.
//! - **Catch-up**: committed entries travel with their commit certificates,
//!   so one honest peer is enough to replay a missed range.
//!
//! The core is synchronous and does no I/O: callers feed it verified inputs
//! and carry out the `Effect`s it emits.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use nc_01_uniqueness_store::UniquenessStore;
use shared_crypto::{Digest32, Ed25519KeyPair, Sha256Chain};
use shared_types::{
    ClusterConfig, CommitRequest, IdentityVerifier, ReplicaId, ReplicaVote, SignedMessage, TxId,
};
use tracing::{debug, error, info, warn};

use super::certificates::{
    compute_reproposals, verify_committed, verify_view_change, Reproposals,
};
use super::config::ReplicaConfig;
use super::error::{ConsensusError, ConsensusResult};
use super::messages::{
    log_link, AgreementMessage, CheckpointVote, CommittedEntry, EntryBody, Envelope, NewView,
    OrderedEntry, PhaseVote, PrePrepare, PreparedCertificate, ViewChange,
};
use crate::metrics;

/// Upper bound on messages held back for a later view or until catch-up ends.
const MAX_STASHED: usize = 4096;

/// Output of the core for the service layer to carry out.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Send to every other replica.
    Broadcast(Envelope),
    /// Send to one replica.
    Send(ReplicaId, Envelope),
    /// A request was executed; answer every client waiting on it whose
    /// request has content digest `request`.
    Decided { request: Digest32, vote: ReplicaVote },
}

/// Immediate answer to a client submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientOutcome {
    /// Already decided; the cached vote.
    Decided(ReplicaVote),
    /// Failed validation; never ordered.
    Rejected(String),
    /// Accepted for ordering; a `Decided` effect follows.
    Pending,
    /// The replica stopped ordering after a local failure.
    Unavailable(String),
}

#[derive(Default)]
struct Slot {
    entry: Option<(OrderedEntry, Digest32)>,
    prepares: BTreeMap<ReplicaId, (Digest32, Envelope)>,
    commits: BTreeMap<ReplicaId, (Digest32, Envelope)>,
    prepared: bool,
    committed: bool,
}

impl Slot {
    fn matching(votes: &BTreeMap<ReplicaId, (Digest32, Envelope)>, digest: &Digest32) -> Vec<Envelope> {
        votes
            .values()
            .filter(|(d, _)| d == digest)
            .map(|(_, env)| env.clone())
            .collect()
    }
}

struct ViewChangeState {
    target: u64,
    started_at: u64,
    timeout_ms: u64,
}

/// A signed vote and the content digest of the request it answers.
struct DecidedRequest {
    request: Digest32,
    vote: ReplicaVote,
}

struct PendingRequest {
    request: CommitRequest,
    digest: Digest32,
    /// Start of the current view change timer.
    since: u64,
    received_at: u64,
}

struct CatchUp {
    started_at: u64,
    responders: HashSet<ReplicaId>,
}

/// Agreement state of one replica.
pub struct ReplicaCore {
    id: ReplicaId,
    keypair: Ed25519KeyPair,
    cluster: Arc<ClusterConfig>,
    identity: Arc<dyn IdentityVerifier>,
    store: Arc<UniquenessStore>,
    config: ReplicaConfig,
    now: u64,

    view: u64,
    view_change: Option<ViewChangeState>,
    next_seq: u64,
    slots: BTreeMap<(u64, u64), Slot>,
    prepared_certs: BTreeMap<u64, PreparedCertificate>,
    ready: BTreeMap<u64, CommittedEntry>,
    decided_log: BTreeMap<u64, CommittedEntry>,
    last_executed: u64,
    chain: Sha256Chain,
    decisions: HashMap<TxId, DecidedRequest>,

    stable_seq: u64,
    stable_digest: Digest32,
    stable_proof: Vec<Envelope>,
    checkpoint_votes: BTreeMap<u64, BTreeMap<ReplicaId, Envelope>>,
    /// Latest checkpoint each peer reported beyond the log window.
    checkpoints_ahead: BTreeMap<ReplicaId, u64>,
    own_checkpoints: BTreeMap<u64, Digest32>,

    view_changes: BTreeMap<u64, BTreeMap<ReplicaId, (Envelope, ViewChange)>>,
    pending: HashMap<TxId, PendingRequest>,
    assigned: HashMap<TxId, u64>,
    proposal_queue: VecDeque<CommitRequest>,
    stashed: Vec<Envelope>,
    catch_up: Option<CatchUp>,
    last_fetch_at: Option<u64>,

    faulty: BTreeSet<ReplicaId>,
    halted: bool,
    effects: Vec<Effect>,
}

impl ReplicaCore {
    pub fn new(
        id: ReplicaId,
        keypair: Ed25519KeyPair,
        cluster: Arc<ClusterConfig>,
        identity: Arc<dyn IdentityVerifier>,
        store: Arc<UniquenessStore>,
        config: ReplicaConfig,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        if !cluster.contains(id) {
            return Err(ConsensusError::UnknownReplica(id));
        }
        Ok(Self {
            id,
            keypair,
            cluster,
            identity,
            store,
            config,
            now: 0,
            view: 0,
            view_change: None,
            next_seq: 1,
            slots: BTreeMap::new(),
            prepared_certs: BTreeMap::new(),
            ready: BTreeMap::new(),
            decided_log: BTreeMap::new(),
            last_executed: 0,
            chain: Sha256Chain::new(),
            decisions: HashMap::new(),
            stable_seq: 0,
            stable_digest: [0u8; 32],
            stable_proof: Vec::new(),
            checkpoint_votes: BTreeMap::new(),
            checkpoints_ahead: BTreeMap::new(),
            own_checkpoints: BTreeMap::new(),
            view_changes: BTreeMap::new(),
            pending: HashMap::new(),
            assigned: HashMap::new(),
            proposal_queue: VecDeque::new(),
            stashed: Vec::new(),
            catch_up: None,
            last_fetch_at: None,
            faulty: BTreeSet::new(),
            halted: false,
            effects: Vec::new(),
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn primary(&self) -> ReplicaId {
        self.cluster.primary_for_view(self.view)
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.id
    }

    pub fn is_view_changing(&self) -> bool {
        self.view_change.is_some()
    }

    pub fn is_catching_up(&self) -> bool {
        self.catch_up.is_some()
    }

    pub fn last_executed(&self) -> u64 {
        self.last_executed
    }

    /// Head of the executed-log hash chain.
    pub fn log_digest(&self) -> Digest32 {
        self.chain.head()
    }

    pub fn stable_checkpoint(&self) -> (u64, Digest32) {
        (self.stable_seq, self.stable_digest)
    }

    pub fn decision_for(&self, tx_id: &TxId) -> Option<&ReplicaVote> {
        self.decisions.get(tx_id).map(|d| &d.vote)
    }

    /// Replicas caught equivocating.
    pub fn faulty_replicas(&self) -> &BTreeSet<ReplicaId> {
        &self.faulty
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Take the effects produced since the last call.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    /// Begin startup catch-up. Proposals are held back until it completes.
    pub fn start(&mut self, now: u64) {
        self.now = now;
        if self.cluster.size() == 1 {
            return;
        }
        info!("[nc-02] {} starting catch-up from seq {}", self.id, self.last_executed + 1);
        self.catch_up = Some(CatchUp {
            started_at: now,
            responders: HashSet::new(),
        });
        self.fetch_log(true);
    }

    /// A client submitted `request` to this replica.
    pub fn on_client_request(&mut self, request: CommitRequest, now: u64) -> ClientOutcome {
        self.now = now;
        let digest = request.content_digest();
        if let Some(decided) = self.decisions.get(&request.tx_id) {
            if decided.request != digest {
                return self.reject_reused_tx_id(&request);
            }
            debug!("[nc-02] {} returning cached decision for {}", self.id, request.tx_id);
            return ClientOutcome::Decided(decided.vote.clone());
        }
        if self.halted {
            return ClientOutcome::Unavailable("replica halted".into());
        }
        if let Err(e) = request.validate(&*self.identity) {
            info!("[nc-02] {} rejected {}: {}", self.id, request.tx_id, e);
            metrics::record_request_rejected("invalid_request");
            return ClientOutcome::Rejected(e.to_string());
        }

        let tx_id = request.tx_id;
        let pending = self.pending.entry(tx_id).or_insert_with(|| PendingRequest {
            request: request.clone(),
            digest,
            since: now,
            received_at: now,
        });
        if pending.digest != digest {
            return self.reject_reused_tx_id(&request);
        }

        if self.view_change.is_none() {
            if self.is_primary() {
                self.propose(request);
            } else {
                let primary = self.primary();
                self.send(primary, AgreementMessage::Forward(request));
            }
        }
        ClientOutcome::Pending
    }

    fn reject_reused_tx_id(&self, request: &CommitRequest) -> ClientOutcome {
        warn!(
            "[nc-02] {} rejected {}: transaction id already used with other inputs",
            self.id, request.tx_id
        );
        metrics::record_request_rejected("reused_tx_id");
        ClientOutcome::Rejected(format!(
            "transaction {} was already submitted with different inputs",
            request.tx_id
        ))
    }

    /// A message arrived from a peer.
    pub fn on_message(&mut self, envelope: Envelope, now: u64) -> ConsensusResult<()> {
        self.now = now;
        if self.halted {
            return Err(ConsensusError::Halted);
        }
        if envelope.sender == self.id {
            return Ok(());
        }
        envelope.verify(&self.cluster, &*self.identity)?;

        if self.catch_up.is_some() && matches!(envelope.payload, AgreementMessage::PrePrepare(_)) {
            self.stash(envelope);
            return Ok(());
        }
        self.process(envelope)
    }

    /// Timer tick.
    pub fn on_tick(&mut self, now: u64) -> ConsensusResult<()> {
        self.now = now;
        if self.halted {
            return Err(ConsensusError::Halted);
        }

        let catch_up_timeout = self.ms(self.config.catch_up_timeout);
        let catch_up_expired = self
            .catch_up
            .as_ref()
            .map_or(false, |cu| now.saturating_sub(cu.started_at) >= catch_up_timeout);
        if catch_up_expired {
            warn!(
                "[nc-02] {} catch-up timed out at seq {}, resuming",
                self.id, self.last_executed
            );
            self.finish_catch_up()?;
        }

        let expired_view_change = self
            .view_change
            .as_ref()
            .filter(|vc| now.saturating_sub(vc.started_at) >= vc.timeout_ms)
            .map(|vc| vc.target);
        if let Some(target) = expired_view_change {
            warn!("[nc-02] {} view change to {} timed out", self.id, target);
            self.start_view_change(target + 1)?;
        } else if self.view_change.is_none() {
            let timeout = self.ms(self.config.request_timeout);
            let stuck = self
                .pending
                .values()
                .any(|p| now.saturating_sub(p.since) >= timeout);
            if stuck {
                warn!(
                    "[nc-02] {} request pending past timeout in view {}",
                    self.id, self.view
                );
                self.start_view_change(self.view + 1)?;
            }
        }

        if self.has_gap() {
            self.fetch_log(false);
        }
        Ok(())
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    fn process(&mut self, envelope: Envelope) -> ConsensusResult<()> {
        let sender = envelope.sender;
        match &envelope.payload {
            AgreementMessage::Forward(request) => {
                let request = request.clone();
                self.on_forward(sender, request);
                Ok(())
            }
            AgreementMessage::PrePrepare(pp) => {
                let pp = pp.clone();
                self.on_pre_prepare(envelope, pp)
            }
            AgreementMessage::Prepare(vote) => {
                let vote = *vote;
                self.on_prepare(envelope, vote)
            }
            AgreementMessage::Commit(vote) => {
                let vote = *vote;
                self.on_commit(envelope, vote)
            }
            AgreementMessage::Checkpoint(cp) => {
                let cp = *cp;
                self.on_checkpoint(envelope, cp)
            }
            AgreementMessage::ViewChange(vc) => {
                let vc = vc.clone();
                self.on_view_change(envelope, vc)
            }
            AgreementMessage::NewView(nv) => {
                let nv = nv.clone();
                self.on_new_view(sender, nv)
            }
            AgreementMessage::FetchLog { from_seq } => {
                let from_seq = *from_seq;
                self.on_fetch_log(sender, from_seq);
                Ok(())
            }
            AgreementMessage::LogEntries { entries, has_more } => {
                let (entries, has_more) = (entries.clone(), *has_more);
                self.on_log_entries(sender, entries, has_more)
            }
        }
    }

    // =========================================================================
    // NORMAL OPERATION
    // =========================================================================

    fn on_forward(&mut self, sender: ReplicaId, request: CommitRequest) {
        if !self.is_primary() || self.view_change.is_some() {
            return;
        }
        if let Err(e) = request.validate(&*self.identity) {
            warn!("[nc-02] {} forwarded invalid request {}: {}", sender, request.tx_id, e);
            return;
        }
        self.propose(request);
    }

    fn propose(&mut self, request: CommitRequest) {
        let tx_id = request.tx_id;
        if self.decisions.contains_key(&tx_id) || self.assigned.contains_key(&tx_id) {
            return;
        }
        if self.catch_up.is_some() || self.next_seq > self.stable_seq + self.config.log_window {
            if !self.proposal_queue.iter().any(|r| r.tx_id == tx_id) {
                debug!("[nc-02] {} holding back {}", self.id, tx_id);
                self.proposal_queue.push_back(request);
            }
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.assigned.insert(tx_id, seq);
        debug!(view = self.view, seq, tx = %tx_id, "[nc-02] Proposing");

        let entry = OrderedEntry::request(request, self.now);
        self.broadcast(AgreementMessage::PrePrepare(PrePrepare {
            view: self.view,
            seq,
            entry,
        }));
    }

    fn drain_queue(&mut self) {
        if !self.is_primary() || self.view_change.is_some() || self.catch_up.is_some() {
            return;
        }
        while self.next_seq <= self.stable_seq + self.config.log_window {
            match self.proposal_queue.pop_front() {
                Some(request) => self.propose(request),
                None => break,
            }
        }
    }

    fn on_pre_prepare(&mut self, envelope: Envelope, pp: PrePrepare) -> ConsensusResult<()> {
        let sender = envelope.sender;
        if sender != self.cluster.primary_for_view(pp.view) {
            return Err(ConsensusError::UnexpectedMessage {
                sender,
                reason: format!("pre-prepare for view {} from non-primary", pp.view),
            });
        }
        if pp.view > self.view {
            self.stash(envelope);
            return Ok(());
        }
        if pp.view < self.view || self.view_change.is_some() || !self.in_window(pp.seq) {
            return Ok(());
        }

        let request = match &pp.entry.body {
            EntryBody::Request(request) => request,
            EntryBody::Null => {
                return Err(ConsensusError::UnexpectedMessage {
                    sender,
                    reason: "null entry outside a new view".into(),
                })
            }
        };
        if sender != self.id {
            request
                .validate(&*self.identity)
                .map_err(|e| ConsensusError::InvalidRequest(e.to_string()))?;
            let skew = self.ms(self.config.max_clock_skew);
            if pp.entry.timestamp.abs_diff(self.now) > skew {
                return Err(ConsensusError::UnexpectedMessage {
                    sender,
                    reason: format!("timestamp {} outside clock skew", pp.entry.timestamp),
                });
            }
        }

        let digest = pp.entry.digest();
        let slot = self.slots.entry((pp.view, pp.seq)).or_default();
        match &slot.entry {
            Some((_, existing)) if *existing != digest => {
                self.flag_equivocation(sender, "pre-prepare", pp.view, pp.seq);
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => slot.entry = Some((pp.entry, digest)),
        }

        self.broadcast(AgreementMessage::Prepare(PhaseVote {
            view: pp.view,
            seq: pp.seq,
            digest,
        }));
        self.check_prepared(pp.view, pp.seq)
    }

    fn on_prepare(&mut self, envelope: Envelope, vote: PhaseVote) -> ConsensusResult<()> {
        if !self.accepts_phase_vote(&vote) {
            return Ok(());
        }
        let sender = envelope.sender;
        let slot = self.slots.entry((vote.view, vote.seq)).or_default();
        match slot.prepares.get(&sender) {
            Some((digest, _)) if *digest != vote.digest => {
                self.flag_equivocation(sender, "prepare", vote.view, vote.seq);
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => {
                slot.prepares.insert(sender, (vote.digest, envelope));
            }
        }
        self.check_prepared(vote.view, vote.seq)
    }

    fn on_commit(&mut self, envelope: Envelope, vote: PhaseVote) -> ConsensusResult<()> {
        if !self.accepts_phase_vote(&vote) {
            return Ok(());
        }
        let sender = envelope.sender;
        let slot = self.slots.entry((vote.view, vote.seq)).or_default();
        match slot.commits.get(&sender) {
            Some((digest, _)) if *digest != vote.digest => {
                self.flag_equivocation(sender, "commit", vote.view, vote.seq);
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => {
                slot.commits.insert(sender, (vote.digest, envelope));
            }
        }
        self.check_committed(vote.view, vote.seq)
    }

    fn accepts_phase_vote(&self, vote: &PhaseVote) -> bool {
        let floor = match &self.view_change {
            Some(vc) => vc.target,
            None => self.view,
        };
        vote.view >= floor && self.in_window(vote.seq)
    }

    fn check_prepared(&mut self, view: u64, seq: u64) -> ConsensusResult<()> {
        if view != self.view || self.view_change.is_some() {
            return Ok(());
        }
        let quorum = self.cluster.quorum();
        let Some(slot) = self.slots.get_mut(&(view, seq)) else {
            return Ok(());
        };
        if slot.prepared {
            return Ok(());
        }
        let Some((entry, digest)) = slot.entry.clone() else {
            return Ok(());
        };
        let prepares = Slot::matching(&slot.prepares, &digest);
        if prepares.len() < quorum {
            return Ok(());
        }
        slot.prepared = true;

        let replace = self
            .prepared_certs
            .get(&seq)
            .map_or(true, |existing| existing.view <= view);
        if replace {
            self.prepared_certs.insert(
                seq,
                PreparedCertificate {
                    view,
                    seq,
                    entry,
                    prepares,
                },
            );
        }

        self.broadcast(AgreementMessage::Commit(PhaseVote { view, seq, digest }));
        self.check_committed(view, seq)
    }

    fn check_committed(&mut self, view: u64, seq: u64) -> ConsensusResult<()> {
        if view != self.view || self.view_change.is_some() {
            return Ok(());
        }
        let quorum = self.cluster.quorum();
        let Some(slot) = self.slots.get_mut(&(view, seq)) else {
            return Ok(());
        };
        if !slot.prepared || slot.committed {
            return Ok(());
        }
        let Some((entry, digest)) = slot.entry.clone() else {
            return Ok(());
        };
        let commits = Slot::matching(&slot.commits, &digest);
        if commits.len() < quorum {
            return Ok(());
        }
        slot.committed = true;

        if seq > self.last_executed {
            self.ready.insert(
                seq,
                CommittedEntry {
                    view,
                    seq,
                    entry,
                    commits,
                },
            );
        }
        self.try_execute()
    }

    fn try_execute(&mut self) -> ConsensusResult<()> {
        while let Some(entry) = self.ready.remove(&(self.last_executed + 1)) {
            self.execute(entry)?;
        }
        self.ready = self.ready.split_off(&(self.last_executed + 1));
        Ok(())
    }

    fn execute(&mut self, committed: CommittedEntry) -> ConsensusResult<()> {
        let seq = committed.seq;
        let digest = committed.entry.digest();

        if let EntryBody::Request(request) = &committed.entry.body {
            let tx_id = request.tx_id;
            let content = request.content_digest();
            let vote = match self.decisions.get(&tx_id) {
                Some(decided) if decided.request == content => Some(decided.vote.clone()),
                Some(_) => {
                    warn!(
                        seq,
                        tx = %tx_id,
                        "[nc-02] Skipping entry reusing a decided transaction id with other inputs"
                    );
                    None
                }
                None => {
                    let decision = match self.store.try_commit(
                        tx_id,
                        &request.inputs,
                        request.requester,
                        committed.entry.timestamp,
                    ) {
                        Ok(decision) => decision,
                        Err(e) => {
                            error!("[nc-02] {} halting, store failed at seq {}: {}", self.id, seq, e);
                            self.halted = true;
                            return Err(ConsensusError::Store(e));
                        }
                    };
                    if decision.is_commit() {
                        info!(view = committed.view, seq, tx = %tx_id, "[nc-02] Committed");
                        metrics::record_request_committed();
                    } else {
                        info!(view = committed.view, seq, tx = %tx_id, "[nc-02] Conflict");
                        metrics::record_request_conflicted();
                    }
                    let vote = ReplicaVote::signed(self.id, tx_id, decision, &self.keypair);
                    self.decisions.insert(
                        tx_id,
                        DecidedRequest {
                            request: content,
                            vote: vote.clone(),
                        },
                    );
                    Some(vote)
                }
            };
            if let Some(vote) = vote {
                if let Some(pending) = self.pending.remove(&tx_id) {
                    let elapsed = self.now.saturating_sub(pending.received_at);
                    metrics::record_ordering_latency(elapsed as f64 / 1000.0);
                }
                self.assigned.remove(&tx_id);
                self.effects.push(Effect::Decided {
                    request: content,
                    vote,
                });
            }
        }

        self.chain.absorb(&log_link(seq, &digest));
        self.last_executed = seq;
        self.decided_log.insert(seq, committed);

        if seq % self.config.checkpoint_interval == 0 {
            let head = self.chain.head();
            self.own_checkpoints.insert(seq, head);
            self.broadcast(AgreementMessage::Checkpoint(CheckpointVote { seq, digest: head }));
        }
        Ok(())
    }

    // =========================================================================
    // CHECKPOINTS
    // =========================================================================

    fn on_checkpoint(&mut self, envelope: Envelope, cp: CheckpointVote) -> ConsensusResult<()> {
        if cp.seq <= self.stable_seq || cp.seq % self.config.checkpoint_interval != 0 {
            return Ok(());
        }
        let sender = envelope.sender;
        if !self.in_window(cp.seq) {
            // Only used to notice that this replica has fallen behind.
            let latest = self.checkpoints_ahead.entry(sender).or_insert(cp.seq);
            *latest = (*latest).max(cp.seq);
            let last_executed = self.last_executed;
            let ahead = self
                .checkpoints_ahead
                .values()
                .filter(|seq| **seq > last_executed)
                .count();
            if ahead >= self.cluster.weak_quorum() {
                debug!("[nc-02] {} behind checkpoints beyond the log window", self.id);
                self.fetch_log(false);
            }
            return Ok(());
        }
        let votes = self.checkpoint_votes.entry(cp.seq).or_default();
        if votes.contains_key(&sender) {
            return Ok(());
        }
        votes.insert(sender, envelope);

        let matching: Vec<Envelope> = votes
            .values()
            .filter(|env| {
                matches!(&env.payload, AgreementMessage::Checkpoint(c) if c.digest == cp.digest)
            })
            .cloned()
            .collect();

        if matching.len() >= self.cluster.weak_quorum() && cp.seq > self.last_executed {
            debug!("[nc-02] {} behind checkpoint {}", self.id, cp.seq);
            self.fetch_log(false);
        }
        if matching.len() < self.cluster.quorum() {
            return Ok(());
        }
        match self.own_checkpoints.get(&cp.seq) {
            Some(own) if *own == cp.digest => {
                self.stabilize(cp.seq, cp.digest, matching);
            }
            Some(_) => {
                error!(
                    "[nc-02] {} executed log diverges from quorum at checkpoint {}",
                    self.id, cp.seq
                );
            }
            None => {}
        }
        Ok(())
    }

    fn stabilize(&mut self, seq: u64, digest: Digest32, proof: Vec<Envelope>) {
        self.stable_seq = seq;
        self.stable_digest = digest;
        self.stable_proof = proof;

        self.slots.retain(|(_, s), _| *s > seq);
        self.prepared_certs = self.prepared_certs.split_off(&(seq + 1));
        self.checkpoint_votes = self.checkpoint_votes.split_off(&(seq + 1));
        self.checkpoints_ahead.retain(|_, ahead| *ahead > seq);
        self.own_checkpoints = self.own_checkpoints.split_off(&seq);

        info!("[nc-02] {} checkpoint {} stable", self.id, seq);
        self.drain_queue();
    }

    // =========================================================================
    // VIEW CHANGE
    // =========================================================================

    fn start_view_change(&mut self, target: u64) -> ConsensusResult<()> {
        let base = self.ms(self.config.view_change_timeout);
        let max = self.ms(self.config.max_view_change_timeout);
        let timeout_ms = match &self.view_change {
            Some(current) => (current.timeout_ms.saturating_mul(2)).min(max),
            None => base,
        };
        self.view_change = Some(ViewChangeState {
            target,
            started_at: self.now,
            timeout_ms,
        });
        metrics::record_view_change();
        warn!("[nc-02] {} starting view change {} -> {}", self.id, self.view, target);

        let prepared = self
            .prepared_certs
            .range(self.stable_seq + 1..=self.stable_seq + self.config.log_window)
            .map(|(_, cert)| cert.clone())
            .collect();
        let vc = ViewChange {
            new_view: target,
            stable_seq: self.stable_seq,
            stable_digest: self.stable_digest,
            checkpoint_proof: self.stable_proof.clone(),
            prepared,
        };
        self.broadcast(AgreementMessage::ViewChange(vc));
        self.try_new_view(target)
    }

    fn on_view_change(&mut self, envelope: Envelope, vc: ViewChange) -> ConsensusResult<()> {
        if vc.new_view <= self.view {
            return Ok(());
        }
        let sender = envelope.sender;
        if sender != self.id {
            verify_view_change(&vc, &self.cluster, &*self.identity, self.config.log_window)?;
        }
        let new_view = vc.new_view;
        // One view change per sender: the highest it has asked for.
        let previous = self
            .view_changes
            .iter()
            .find_map(|(view, senders)| senders.contains_key(&sender).then_some(*view));
        match previous {
            Some(view) if view >= new_view => return Ok(()),
            Some(view) => {
                if let Some(senders) = self.view_changes.get_mut(&view) {
                    senders.remove(&sender);
                    if senders.is_empty() {
                        self.view_changes.remove(&view);
                    }
                }
            }
            None => {}
        }
        self.view_changes
            .entry(new_view)
            .or_default()
            .insert(sender, (envelope, vc));

        // Join once f+1 replicas want to move past where this replica is headed.
        let current = self.view_change.as_ref().map_or(self.view, |s| s.target);
        let mut highest: BTreeMap<ReplicaId, u64> = BTreeMap::new();
        for (view, senders) in self.view_changes.range(current + 1..) {
            for replica in senders.keys().filter(|r| **r != self.id) {
                highest.insert(*replica, *view);
            }
        }
        if highest.len() >= self.cluster.weak_quorum() {
            let mut views: Vec<u64> = highest.into_values().collect();
            views.sort_unstable_by(|a, b| b.cmp(a));
            let join = views[self.cluster.weak_quorum() - 1];
            info!("[nc-02] {} joining view change to {}", self.id, join);
            return self.start_view_change(join);
        }

        self.try_new_view(new_view)
    }

    fn try_new_view(&mut self, view: u64) -> ConsensusResult<()> {
        if self.cluster.primary_for_view(view) != self.id {
            return Ok(());
        }
        if self.view_change.as_ref().map(|s| s.target) != Some(view) {
            return Ok(());
        }
        let Some(changes) = self.view_changes.get(&view) else {
            return Ok(());
        };
        if changes.len() < self.cluster.quorum() {
            return Ok(());
        }
        let view_changes = changes
            .values()
            .take(self.cluster.quorum())
            .map(|(env, _)| env.clone())
            .collect();
        info!("[nc-02] {} announcing new view {}", self.id, view);
        self.broadcast(AgreementMessage::NewView(NewView { view, view_changes }));
        Ok(())
    }

    fn on_new_view(&mut self, sender: ReplicaId, nv: NewView) -> ConsensusResult<()> {
        if nv.view <= self.view {
            return Ok(());
        }
        if sender != self.cluster.primary_for_view(nv.view) {
            return Err(ConsensusError::UnexpectedMessage {
                sender,
                reason: format!("new-view {} from non-primary", nv.view),
            });
        }

        let mut senders = BTreeSet::new();
        let mut changes = Vec::with_capacity(nv.view_changes.len());
        for envelope in &nv.view_changes {
            envelope.verify(&self.cluster, &*self.identity)?;
            let AgreementMessage::ViewChange(vc) = &envelope.payload else {
                return Err(ConsensusError::InvalidCertificate {
                    what: "new view",
                    reason: format!("contains a {}", envelope.payload.kind()),
                });
            };
            if vc.new_view != nv.view || !senders.insert(envelope.sender) {
                return Err(ConsensusError::InvalidCertificate {
                    what: "new view",
                    reason: "mismatched or duplicate view change".into(),
                });
            }
            verify_view_change(vc, &self.cluster, &*self.identity, self.config.log_window)?;
            changes.push(vc.clone());
        }
        if senders.len() < self.cluster.quorum() {
            return Err(ConsensusError::InvalidCertificate {
                what: "new view",
                reason: format!("{} view change(s), quorum is {}", senders.len(), self.cluster.quorum()),
            });
        }

        let reproposals = compute_reproposals(&changes);
        self.install_view(nv.view, reproposals)
    }

    fn install_view(&mut self, view: u64, rp: Reproposals) -> ConsensusResult<()> {
        info!(
            "[nc-02] {} installed view {} (low={}, re-proposals={})",
            self.id,
            view,
            rp.low_seq,
            rp.entries.len()
        );
        self.view = view;
        self.view_change = None;
        self.view_changes = self.view_changes.split_off(&(view + 1));
        self.slots.retain(|(v, _), _| *v >= view);
        self.assigned.clear();
        self.next_seq = rp.high_seq().max(self.last_executed).max(self.stable_seq) + 1;

        let stable_seq = self.stable_seq;
        for (seq, entry) in rp.entries.iter().filter(|(seq, _)| *seq > stable_seq) {
            let digest = entry.digest();
            if let Some(tx_id) = entry.tx_id().filter(|tx| !self.decisions.contains_key(tx)) {
                self.assigned.insert(tx_id, *seq);
            }
            self.slots.entry((view, *seq)).or_default().entry = Some((entry.clone(), digest));
            self.broadcast(AgreementMessage::Prepare(PhaseVote {
                view,
                seq: *seq,
                digest,
            }));
        }
        for (seq, _) in &rp.entries {
            self.check_prepared(view, *seq)?;
        }

        if self.last_executed < rp.low_seq {
            self.last_fetch_at = None;
            self.fetch_log(false);
        }

        let now = self.now;
        for pending in self.pending.values_mut() {
            pending.since = now;
        }
        let requests: Vec<CommitRequest> =
            self.pending.values().map(|p| p.request.clone()).collect();
        if self.is_primary() {
            for request in requests {
                self.propose(request);
            }
            self.drain_queue();
        } else {
            self.proposal_queue.clear();
            let primary = self.primary();
            for request in requests {
                self.send(primary, AgreementMessage::Forward(request));
            }
        }

        self.replay_stashed()
    }

    // =========================================================================
    // CATCH-UP
    // =========================================================================

    fn has_gap(&self) -> bool {
        self.ready
            .keys()
            .next()
            .map_or(false, |first| *first > self.last_executed + 1)
    }

    fn fetch_log(&mut self, force: bool) {
        let interval = self.ms(self.config.catch_up_timeout);
        if !force {
            if let Some(last) = self.last_fetch_at {
                if self.now.saturating_sub(last) < interval {
                    return;
                }
            }
        }
        self.last_fetch_at = Some(self.now);
        let from_seq = self.last_executed + 1;
        debug!("[nc-02] {} fetching log from seq {}", self.id, from_seq);
        self.broadcast_to_peers(AgreementMessage::FetchLog { from_seq });
    }

    fn on_fetch_log(&mut self, sender: ReplicaId, from_seq: u64) {
        let entries: Vec<CommittedEntry> = self
            .decided_log
            .range(from_seq..)
            .take(self.config.catch_up_batch)
            .map(|(_, entry)| entry.clone())
            .collect();
        let has_more = entries
            .last()
            .map_or(false, |last| last.seq < self.last_executed);
        self.send(sender, AgreementMessage::LogEntries { entries, has_more });
    }

    fn on_log_entries(
        &mut self,
        sender: ReplicaId,
        entries: Vec<CommittedEntry>,
        has_more: bool,
    ) -> ConsensusResult<()> {
        let before = self.last_executed;
        for entry in entries {
            if entry.seq <= self.last_executed || self.ready.contains_key(&entry.seq) {
                continue;
            }
            if let Err(e) = verify_committed(&entry, &self.cluster, &*self.identity) {
                warn!("[nc-02] {} sent bad log entry {}: {}", sender, entry.seq, e);
                continue;
            }
            self.ready.insert(entry.seq, entry);
        }
        self.try_execute()?;

        if self.last_executed > before {
            info!(
                "[nc-02] {} caught up seq {}..={} from {}",
                self.id,
                before + 1,
                self.last_executed,
                sender
            );
        }
        if has_more && self.last_executed > before {
            let from_seq = self.last_executed + 1;
            self.send(sender, AgreementMessage::FetchLog { from_seq });
        }

        let mut complete = false;
        if let Some(cu) = &mut self.catch_up {
            cu.responders.insert(sender);
            complete = !has_more && cu.responders.len() + 1 >= self.cluster.quorum();
        }
        if complete {
            self.finish_catch_up()?;
        }
        Ok(())
    }

    fn finish_catch_up(&mut self) -> ConsensusResult<()> {
        if self.catch_up.take().is_some() {
            info!("[nc-02] {} catch-up complete at seq {}", self.id, self.last_executed);
            self.next_seq = self.next_seq.max(self.last_executed + 1);
        }
        self.replay_stashed()?;
        self.drain_queue();
        Ok(())
    }

    fn stash(&mut self, envelope: Envelope) {
        if self.stashed.len() < MAX_STASHED {
            self.stashed.push(envelope);
        }
    }

    fn replay_stashed(&mut self) -> ConsensusResult<()> {
        for envelope in std::mem::take(&mut self.stashed) {
            if let Err(e) = self.process(envelope) {
                debug!("[nc-02] {} dropped stashed message: {}", self.id, e);
            }
        }
        Ok(())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn in_window(&self, seq: u64) -> bool {
        seq > self.stable_seq && seq <= self.stable_seq + self.config.log_window
    }

    fn ms(&self, duration: std::time::Duration) -> u64 {
        duration.as_millis() as u64
    }

    fn flag_equivocation(&mut self, sender: ReplicaId, what: &str, view: u64, seq: u64) {
        if self.faulty.insert(sender) {
            warn!(
                "[nc-02] {} equivocated on {} (view={}, seq={})",
                sender, what, view, seq
            );
        }
    }

    fn seal(&self, message: AgreementMessage) -> Option<Envelope> {
        match SignedMessage::sign(self.id, message, &self.keypair) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                error!("[nc-02] {} could not sign message: {}", self.id, e);
                None
            }
        }
    }

    /// Send to every peer and process locally.
    fn broadcast(&mut self, message: AgreementMessage) {
        let Some(envelope) = self.seal(message) else {
            return;
        };
        self.effects.push(Effect::Broadcast(envelope.clone()));
        if let Err(e) = self.process(envelope) {
            debug!("[nc-02] {} own message rejected: {}", self.id, e);
        }
    }

    fn broadcast_to_peers(&mut self, message: AgreementMessage) {
        if let Some(envelope) = self.seal(message) {
            self.effects.push(Effect::Broadcast(envelope));
        }
    }

    fn send(&mut self, to: ReplicaId, message: AgreementMessage) {
        if to == self.id {
            return;
        }
        if let Some(envelope) = self.seal(message) {
            self.effects.push(Effect::Send(to, envelope));
        }
    }
}
