//! Client protocol configuration.

use std::time::Duration;

use shared_types::ClusterConfig;

use super::error::ClientConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bounded wait for one dispatch round.
    pub round_timeout: Duration,
    /// Rounds before giving up with `Unavailable`.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Replicas contacted in the first round; all of them when `None`.
    pub dispatch_subset: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(5),
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            dispatch_subset: None,
        }
    }
}

impl ClientConfig {
    /// Short timeouts for tests and local clusters.
    pub fn for_testing() -> Self {
        Self {
            round_timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff_base: Duration::from_millis(20),
            backoff_max: Duration::from_millis(100),
            dispatch_subset: None,
        }
    }

    pub fn validate(&self, cluster: &ClusterConfig) -> Result<(), ClientConfigError> {
        if self.max_attempts == 0 {
            return Err(ClientConfigError::NoAttempts);
        }
        if self.round_timeout.is_zero() {
            return Err(ClientConfigError::ZeroRoundTimeout);
        }
        if self.backoff_base > self.backoff_max {
            return Err(ClientConfigError::BackoffRange {
                base_ms: self.backoff_base.as_millis(),
                max_ms: self.backoff_max.as_millis(),
            });
        }
        if let Some(subset) = self.dispatch_subset {
            if subset < cluster.quorum() || subset > cluster.size() {
                return Err(ClientConfigError::DispatchSubset {
                    subset,
                    quorum: cluster.quorum(),
                    size: cluster.size(),
                });
            }
        }
        Ok(())
    }

    /// Pause after failed round `attempt` (1-based):
    /// `min(backoff_base * 2^(attempt-1), backoff_max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}
