//! Cross-crate tests running real replica services over the in-memory
//! network.

pub mod harness;
mod properties;
mod scenarios;

pub use harness::{CancellingTransport, ClusterHarness, CountingTransport};
