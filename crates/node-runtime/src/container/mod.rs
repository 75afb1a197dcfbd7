//! # Cluster Container
//!
//! Node configuration and the in-process cluster it describes.

pub mod cluster;
pub mod config;

pub use cluster::LocalCluster;
pub use config::{ConfigError, NodeConfig, CONFIG_PATH_VAR};
