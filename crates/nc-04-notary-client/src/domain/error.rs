//! Error types for the client subsystem.

use thiserror::Error;

use super::flow::FlowState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientConfigError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,

    #[error("round_timeout must be positive")]
    ZeroRoundTimeout,

    #[error("backoff_base {base_ms}ms exceeds backoff_max {max_ms}ms")]
    BackoffRange { base_ms: u128, max_ms: u128 },

    #[error("dispatch subset {subset} must be between quorum {quorum} and cluster size {size}")]
    DispatchSubset {
        subset: usize,
        quorum: usize,
        size: usize,
    },
}

/// Refused flow transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal flow transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: FlowState,
    pub to: FlowState,
}
