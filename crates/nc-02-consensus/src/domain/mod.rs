//! Domain layer: the agreement protocol as a synchronous state machine.
//!
//! Nothing in here performs I/O. `ReplicaCore` consumes verified inputs and
//! produces `Effect`s for the service layer to carry out.

pub mod certificates;
pub mod config;
pub mod core;
pub mod error;
pub mod messages;

pub use self::core::{ClientOutcome, Effect, ReplicaCore};
pub use certificates::{compute_reproposals, Reproposals};
pub use config::ReplicaConfig;
pub use error::{ConsensusError, ConsensusResult};
pub use messages::{
    AgreementMessage, CheckpointVote, CommittedEntry, EntryBody, Envelope, NewView, OrderedEntry,
    PhaseVote, PrePrepare, PreparedCertificate, ViewChange,
};
