//! # nc-05-peer-directory
//!
//! Cluster membership addresses published as files.
//!
//! Every replica drops a `<name>.toml` node-info file into a shared
//! directory:
//!
//! ```toml
//! id = 2
//! address = "10.0.0.12:7000"
//! identity = "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29"
//! ```
//!
//! `DirectoryWatcher` polls the directory and turns changes into a stream
//! of `DirectoryEvent`s; `DirectoryAddressResolver` folds that stream into
//! an `AddressResolver` the peer network can use.

pub mod adapters;
pub mod domain;
pub mod service;

pub use adapters::NodeInfoFile;
pub use domain::{diff_snapshots, DirectoryError, DirectoryEvent, DirectoryResult, NodeInfo};
pub use service::{DirectoryAddressResolver, DirectoryWatcher, DEFAULT_POLL_INTERVAL};
