//! # Agreement Messages
//!
//! Payloads exchanged between replicas, always wrapped in a
//! `SignedMessage` (`Envelope`). Certificates embed the signed envelopes
//! they are built from so any replica can re-verify them.

use serde::{Deserialize, Serialize};
use shared_crypto::{sha256_many, Digest32};
use shared_types::{CommitRequest, SignedMessage, TxId};

/// Signed agreement message.
pub type Envelope = SignedMessage<AgreementMessage>;

/// What occupies a sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryBody {
    /// A client request.
    Request(CommitRequest),
    /// Filler for a sequence number left empty across a view change.
    Null,
}

/// Entry the primary assigns to a sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedEntry {
    pub body: EntryBody,
    /// Commit timestamp chosen by the primary (unix millis).
    pub timestamp: u64,
}

impl OrderedEntry {
    pub fn request(request: CommitRequest, timestamp: u64) -> Self {
        Self {
            body: EntryBody::Request(request),
            timestamp,
        }
    }

    pub fn null() -> Self {
        Self {
            body: EntryBody::Null,
            timestamp: 0,
        }
    }

    /// Transaction carried by this entry.
    pub fn tx_id(&self) -> Option<TxId> {
        match &self.body {
            EntryBody::Request(request) => Some(request.tx_id),
            EntryBody::Null => None,
        }
    }

    /// Digest that Prepare and Commit votes refer to.
    pub fn digest(&self) -> Digest32 {
        let timestamp = self.timestamp.to_le_bytes();
        match &self.body {
            EntryBody::Request(request) => {
                sha256_many(&[b"NC-ENTRY-REQUEST".as_slice(), &timestamp, &request.digest()])
            }
            EntryBody::Null => sha256_many(&[b"NC-ENTRY-NULL".as_slice(), &timestamp]),
        }
    }
}

/// Primary's proposal binding `entry` to `(view, seq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: u64,
    pub seq: u64,
    pub entry: OrderedEntry,
}

/// Prepare or Commit vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseVote {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest32,
}

/// Claim that the executed log up to `seq` hashes to `digest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointVote {
    pub seq: u64,
    pub digest: Digest32,
}

/// Proof that `entry` was prepared at `(view, seq)`: a quorum of Prepares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCertificate {
    pub view: u64,
    pub seq: u64,
    pub entry: OrderedEntry,
    pub prepares: Vec<Envelope>,
}

/// Proof that `entry` was committed at `seq`: a quorum of Commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub view: u64,
    pub seq: u64,
    pub entry: OrderedEntry,
    pub commits: Vec<Envelope>,
}

/// Vote to move to `new_view`, carrying what the sender has prepared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    pub new_view: u64,
    pub stable_seq: u64,
    pub stable_digest: Digest32,
    /// Quorum of matching Checkpoint messages; empty when `stable_seq == 0`.
    pub checkpoint_proof: Vec<Envelope>,
    /// Highest-view prepared certificate per sequence number above `stable_seq`.
    pub prepared: Vec<PreparedCertificate>,
}

/// New primary's announcement, justified by a quorum of view changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewView {
    pub view: u64,
    pub view_changes: Vec<Envelope>,
}

/// Every replica-to-replica message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementMessage {
    /// Backup hands a client request to the primary.
    Forward(CommitRequest),
    PrePrepare(PrePrepare),
    Prepare(PhaseVote),
    Commit(PhaseVote),
    Checkpoint(CheckpointVote),
    ViewChange(ViewChange),
    NewView(NewView),
    /// Ask for committed entries starting at `from_seq`.
    FetchLog { from_seq: u64 },
    /// Committed entries with their certificates.
    LogEntries {
        entries: Vec<CommittedEntry>,
        has_more: bool,
    },
}

impl AgreementMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgreementMessage::Forward(_) => "forward",
            AgreementMessage::PrePrepare(_) => "pre-prepare",
            AgreementMessage::Prepare(_) => "prepare",
            AgreementMessage::Commit(_) => "commit",
            AgreementMessage::Checkpoint(_) => "checkpoint",
            AgreementMessage::ViewChange(_) => "view-change",
            AgreementMessage::NewView(_) => "new-view",
            AgreementMessage::FetchLog { .. } => "fetch-log",
            AgreementMessage::LogEntries { .. } => "log-entries",
        }
    }
}

/// Link absorbed into the executed-log hash chain for `seq`.
pub fn log_link(seq: u64, digest: &Digest32) -> [u8; 40] {
    let mut link = [0u8; 40];
    link[..8].copy_from_slice(&seq.to_le_bytes());
    link[8..].copy_from_slice(digest);
    link
}
