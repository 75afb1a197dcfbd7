use parking_lot::Mutex;
use shared_types::ConsumingRecord;

use crate::domain::errors::LogError;
use crate::ports::DurableLog;

/// In-memory durable log for unit tests.
///
/// `fail_appends` simulates a disk that rejects writes.
#[derive(Default)]
pub struct InMemoryDurableLog {
    records: Mutex<Vec<ConsumingRecord>>,
    fail_appends: Mutex<bool>,
}

impl InMemoryDurableLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated log, as if a previous process had written it.
    pub fn with_records(records: Vec<ConsumingRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            fail_appends: Mutex::new(false),
        }
    }

    /// Make subsequent appends fail (or succeed again).
    pub fn set_fail_appends(&self, fail: bool) {
        *self.fail_appends.lock() = fail;
    }
}

impl DurableLog for InMemoryDurableLog {
    fn append_batch(&self, records: &[ConsumingRecord]) -> Result<(), LogError> {
        if *self.fail_appends.lock() {
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated append failure",
            )));
        }
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ConsumingRecord>, LogError> {
        Ok(self.records.lock().clone())
    }
}
