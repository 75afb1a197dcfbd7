//! # Outbound Ports (Driven Ports)
//!
//! Durable log collaborator. The store's in-memory view must be
//! reconstructible by replaying `read_all`.

use shared_types::ConsumingRecord;

use crate::domain::errors::LogError;

/// Append-only, crash-recoverable record of commits.
///
/// Production: `FileDurableLog`
/// Testing: `InMemoryDurableLog`
pub trait DurableLog: Send + Sync {
    /// Persist the records of one committed request as a single unit.
    ///
    /// On error, none of the records may be observable by a later
    /// `read_all`.
    fn append_batch(&self, records: &[ConsumingRecord]) -> Result<(), LogError>;

    /// Persist a single record.
    fn append(&self, record: &ConsumingRecord) -> Result<(), LogError> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Every persisted record, in append order.
    fn read_all(&self) -> Result<Vec<ConsumingRecord>, LogError>;
}
