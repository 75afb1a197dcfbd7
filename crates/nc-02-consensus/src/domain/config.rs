//! Replica configuration.

use std::time::Duration;

use nc_01_uniqueness_store::DEFAULT_SHARD_COUNT;

use super::error::{ConsensusError, ConsensusResult};

/// Tunables of one replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// A request pending longer than this triggers a view change.
    pub request_timeout: Duration,
    /// Initial wait for a view change to complete; doubles on each failure.
    pub view_change_timeout: Duration,
    /// Upper bound for the doubled view change timeout.
    pub max_view_change_timeout: Duration,
    /// Timer resolution of the event loop.
    pub tick_interval: Duration,
    /// Executions between checkpoints.
    pub checkpoint_interval: u64,
    /// Sequence numbers accepted above the stable checkpoint.
    pub log_window: u64,
    /// Accepted distance between a proposal timestamp and the local clock.
    pub max_clock_skew: Duration,
    /// Wait for peers during catch-up before resuming normal operation.
    pub catch_up_timeout: Duration,
    /// Maximum entries per `LogEntries` reply.
    pub catch_up_batch: usize,
    /// Shards of the uniqueness store.
    pub shard_count: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            view_change_timeout: Duration::from_secs(2),
            max_view_change_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(50),
            checkpoint_interval: 64,
            log_window: 256,
            max_clock_skew: Duration::from_secs(5),
            catch_up_timeout: Duration::from_secs(1),
            catch_up_batch: 128,
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

impl ReplicaConfig {
    /// Short timeouts for tests and local clusters.
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_millis(300),
            view_change_timeout: Duration::from_millis(300),
            max_view_change_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_millis(10),
            checkpoint_interval: 4,
            log_window: 16,
            catch_up_timeout: Duration::from_millis(200),
            ..Self::default()
        }
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.checkpoint_interval == 0 {
            return Err(ConsensusError::InvalidConfig(
                "checkpoint_interval must be positive".into(),
            ));
        }
        if self.log_window < 2 * self.checkpoint_interval {
            return Err(ConsensusError::InvalidConfig(format!(
                "log_window {} must be at least twice checkpoint_interval {}",
                self.log_window, self.checkpoint_interval
            )));
        }
        if self.view_change_timeout > self.max_view_change_timeout {
            return Err(ConsensusError::InvalidConfig(
                "view_change_timeout exceeds max_view_change_timeout".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConsensusError::InvalidConfig("tick_interval must be positive".into()));
        }
        if self.catch_up_batch == 0 || self.shard_count == 0 {
            return Err(ConsensusError::InvalidConfig(
                "catch_up_batch and shard_count must be positive".into(),
            ));
        }
        Ok(())
    }
}
