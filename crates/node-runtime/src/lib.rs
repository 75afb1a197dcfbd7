//! # Node Runtime Library
//!
//! Configuration loading and local cluster bootstrap, exposed for tests.
//! The entry point is the `main.rs` binary.

pub mod container;

pub use container::{ConfigError, LocalCluster, NodeConfig};
