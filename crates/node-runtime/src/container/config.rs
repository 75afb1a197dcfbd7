//! # Node Configuration
//!
//! Resolution order: built-in defaults, then the TOML file named by
//! `NC_CONFIG` (if set), then individual `NC_*` environment variables.
//!
//! ```toml
//! [cluster]
//! fault_bound = 1
//! data_dir = "./data"
//! peer_directory = "./peers"     # optional
//! demo_requests = 3
//!
//! [replica]
//! request_timeout_ms = 2000
//! view_change_timeout_ms = 2000
//! checkpoint_interval = 64
//! max_clock_skew_ms = 5000
//!
//! [client]
//! round_timeout_ms = 5000
//! max_attempts = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nc_02_consensus::ReplicaConfig;
use nc_04_notary_client::ClientConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the TOML configuration file.
pub const CONFIG_PATH_VAR: &str = "NC_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub cluster: ClusterSection,
    pub replica: ReplicaSection,
    pub client: ClientSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// `f`; the local cluster runs `3f + 1` replicas.
    pub fault_bound: usize,
    /// One durable log per replica is kept here.
    pub data_dir: PathBuf,
    /// Resolve replica addresses through node-info files in this directory
    /// instead of the static cluster table.
    pub peer_directory: Option<PathBuf>,
    /// Sample requests notarised after startup.
    pub demo_requests: usize,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            fault_bound: 1,
            data_dir: PathBuf::from("./data"),
            peer_directory: None,
            demo_requests: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReplicaSection {
    pub request_timeout_ms: u64,
    pub view_change_timeout_ms: u64,
    pub max_view_change_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub checkpoint_interval: u64,
    pub log_window: u64,
    pub max_clock_skew_ms: u64,
    pub catch_up_timeout_ms: u64,
    pub shard_count: usize,
}

impl Default for ReplicaSection {
    fn default() -> Self {
        let d = ReplicaConfig::default();
        Self {
            request_timeout_ms: millis(d.request_timeout),
            view_change_timeout_ms: millis(d.view_change_timeout),
            max_view_change_timeout_ms: millis(d.max_view_change_timeout),
            tick_interval_ms: millis(d.tick_interval),
            checkpoint_interval: d.checkpoint_interval,
            log_window: d.log_window,
            max_clock_skew_ms: millis(d.max_clock_skew),
            catch_up_timeout_ms: millis(d.catch_up_timeout),
            shard_count: d.shard_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub round_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub dispatch_subset: Option<usize>,
}

impl Default for ClientSection {
    fn default() -> Self {
        let d = ClientConfig::default();
        Self {
            round_timeout_ms: millis(d.round_timeout),
            max_attempts: d.max_attempts,
            backoff_base_ms: millis(d.backoff_base),
            backoff_max_ms: millis(d.backoff_max),
            dispatch_subset: d.dispatch_subset,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Environment variable {var}={value} is not a valid {expected}")]
    Env {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Defaults, then `NC_CONFIG`, then `NC_*` overrides from the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `NC_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("NC_DATA_DIR") {
            self.cluster.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("NC_PEER_DIRECTORY") {
            self.cluster.peer_directory = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(f) = parsed(&lookup, "NC_FAULT_BOUND", "count")? {
            self.cluster.fault_bound = f;
        }
        if let Some(ms) = parsed(&lookup, "NC_REQUEST_TIMEOUT_MS", "duration in ms")? {
            self.replica.request_timeout_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "NC_CLIENT_ROUND_TIMEOUT_MS", "duration in ms")? {
            self.client.round_timeout_ms = ms;
        }
        if let Some(n) = parsed(&lookup, "NC_CLIENT_MAX_ATTEMPTS", "count")? {
            self.client.max_attempts = n;
        }
        Ok(())
    }

    /// Number of replicas in the local cluster.
    pub fn cluster_size(&self) -> usize {
        3 * self.cluster.fault_bound + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.fault_bound > 21 {
            return Err(ConfigError::Invalid(format!(
                "fault_bound {} is too large for a local cluster",
                self.cluster.fault_bound
            )));
        }
        if self.client.max_attempts == 0 {
            return Err(ConfigError::Invalid("client.max_attempts must be at least 1".into()));
        }
        if self.client.round_timeout_ms <= self.replica.request_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "client.round_timeout_ms {} must exceed replica.request_timeout_ms {}",
                self.client.round_timeout_ms, self.replica.request_timeout_ms
            )));
        }
        if let Some(subset) = self.client.dispatch_subset {
            let quorum = 2 * self.cluster.fault_bound + 1;
            if subset < quorum || subset > self.cluster_size() {
                return Err(ConfigError::Invalid(format!(
                    "client.dispatch_subset {} must be between {} and {}",
                    subset,
                    quorum,
                    self.cluster_size()
                )));
            }
        }
        self.replica_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn replica_config(&self) -> ReplicaConfig {
        let r = &self.replica;
        ReplicaConfig {
            request_timeout: Duration::from_millis(r.request_timeout_ms),
            view_change_timeout: Duration::from_millis(r.view_change_timeout_ms),
            max_view_change_timeout: Duration::from_millis(r.max_view_change_timeout_ms),
            tick_interval: Duration::from_millis(r.tick_interval_ms),
            checkpoint_interval: r.checkpoint_interval,
            log_window: r.log_window,
            max_clock_skew: Duration::from_millis(r.max_clock_skew_ms),
            catch_up_timeout: Duration::from_millis(r.catch_up_timeout_ms),
            shard_count: r.shard_count,
            ..ReplicaConfig::default()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let c = &self.client;
        ClientConfig {
            round_timeout: Duration::from_millis(c.round_timeout_ms),
            max_attempts: c.max_attempts,
            backoff_base: Duration::from_millis(c.backoff_base_ms),
            backoff_max: Duration::from_millis(c.backoff_max_ms),
            dispatch_subset: c.dispatch_subset,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parsed<T, F>(lookup: &F, var: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var,
                value,
                expected,
            }),
    }
}
