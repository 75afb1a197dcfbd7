//! Ports layer (Hexagonal Architecture)
//!
//! Outbound dependencies of a running replica: the peer network and a
//! millisecond clock.

use shared_types::{ReplicaId, TransportError};
use tokio::time::Instant;

use crate::domain::Envelope;

/// Delivery of agreement messages between replicas.
///
/// Sends never block the replica loop. Delivery is best effort: the
/// protocol tolerates loss through retransmission on timeouts.
pub trait PeerNetwork: Send + Sync {
    /// Deliver `envelope` to one replica.
    fn send(&self, from: ReplicaId, to: ReplicaId, envelope: Envelope) -> Result<(), TransportError>;

    /// Deliver `envelope` to every replica except `from`.
    fn broadcast(&self, from: ReplicaId, envelope: Envelope);
}

/// Source of commit timestamps and timer readings (unix millis).
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock at construction, advanced by the tokio clock.
///
/// Follows tokio's paused clock in tests, so timeouts can be driven with
/// `tokio::time::advance`.
pub struct SystemTimeSource {
    base_millis: u64,
    started: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        let base_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            base_millis,
            started: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        self.base_millis + self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_time_source_follows_tokio_clock() {
        let clock = SystemTimeSource::new();
        let before = clock.now_millis();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_millis() - before, 250);
    }
}
