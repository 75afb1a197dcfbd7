//! # Agreement Metrics
//!
//! Prometheus metrics for monitoring ordering and execution.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! nc-02-consensus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `notary_requests_committed_total` - Requests executed with a commit decision
//! - `notary_requests_conflicted_total` - Requests executed with a conflict decision
//! - `notary_requests_rejected_total` - Requests refused before ordering (by reason)
//! - `notary_view_changes_total` - View changes started
//! - `notary_ordering_latency_seconds` - Time from receipt to execution

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Histogram,
    IntCounter,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref REQUESTS_COMMITTED: IntCounter = register_int_counter!(
        "notary_requests_committed_total",
        "Total number of requests executed with a commit decision"
    )
    .expect("Failed to create REQUESTS_COMMITTED metric");

    pub static ref REQUESTS_CONFLICTED: IntCounter = register_int_counter!(
        "notary_requests_conflicted_total",
        "Total number of requests executed with a conflict decision"
    )
    .expect("Failed to create REQUESTS_CONFLICTED metric");

    /// Requests refused before ordering, labeled by reason
    pub static ref REQUESTS_REJECTED: CounterVec = register_counter_vec!(
        "notary_requests_rejected_total",
        "Total number of requests refused before ordering",
        &["reason"]
    )
    .expect("Failed to create REQUESTS_REJECTED metric");

    pub static ref VIEW_CHANGES: IntCounter = register_int_counter!(
        "notary_view_changes_total",
        "Total number of view changes started"
    )
    .expect("Failed to create VIEW_CHANGES metric");

    pub static ref ORDERING_LATENCY: Histogram = register_histogram!(
        "notary_ordering_latency_seconds",
        "Time from request receipt to execution in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to create ORDERING_LATENCY metric");
}

#[cfg(feature = "metrics")]
pub fn record_request_committed() {
    REQUESTS_COMMITTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_request_conflicted() {
    REQUESTS_CONFLICTED.inc();
}

/// Record a request refused before ordering
#[cfg(feature = "metrics")]
pub fn record_request_rejected(reason: &str) {
    REQUESTS_REJECTED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_view_change() {
    VIEW_CHANGES.inc();
}

#[cfg(feature = "metrics")]
pub fn record_ordering_latency(seconds: f64) {
    ORDERING_LATENCY.observe(seconds);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_request_committed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_request_conflicted() {}

#[cfg(not(feature = "metrics"))]
pub fn record_request_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_view_change() {}

#[cfg(not(feature = "metrics"))]
pub fn record_ordering_latency(_seconds: f64) {}
