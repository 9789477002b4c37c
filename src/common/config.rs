//! Configuration for quorumlog components
//!
//! Values come from an optional TOML file, then `QUORUMLOG_*` environment
//! variables (nested keys separated by `__`), then CLI flags applied by the
//! binaries.

use crate::common::{Error, ReplicaAddress, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Replica-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica: Option<ReplicaConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Also append logs to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_node_id() -> String {
    "quorumlog".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: None,
            replica: None,
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::InvalidConfig(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("QUORUMLOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("coordinator.replicas"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// Replica set, in fan-out order
    #[serde(default)]
    pub replicas: Vec<ReplicaAddress>,

    /// Reject writes that cannot form a majority including the coordinator
    #[serde(default = "default_true")]
    pub enforce_quorum: bool,

    /// Reject writes whose ack count exceeds the number of live replicas
    #[serde(default)]
    pub suspend_on_replicas_dead: bool,

    /// Period between liveness probes of one replica
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Request timeout for a single liveness probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Wall-clock budget for delivering one entry to one replica
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Bounded wait for an acknowledgment within one attempt
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// First retry delay after a failed connection
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Request-level bound on waiting for the write quorum
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Wait applied when a write requires no replica acknowledgment
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_interval() -> u64 {
    1_000
}
fn default_probe_timeout() -> u64 {
    1_000
}
fn default_connection_timeout() -> u64 {
    10_000
}
fn default_ack_timeout() -> u64 {
    1_000
}
fn default_backoff_base() -> u64 {
    100
}
fn default_backoff_max() -> u64 {
    2_000
}
fn default_write_timeout() -> u64 {
    15_000
}
fn default_grace_period() -> u64 {
    2_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            replicas: Vec::new(),
            enforce_quorum: true,
            suspend_on_replicas_dead: false,
            heartbeat_interval_ms: default_heartbeat_interval(),
            probe_timeout_ms: default_probe_timeout(),
            connection_timeout_ms: default_connection_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            write_timeout_ms: default_write_timeout(),
            grace_period_ms: default_grace_period(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replicas.is_empty() {
            return Err(Error::InvalidConfig("replica set is empty".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for replica in &self.replicas {
            if !seen.insert(replica) {
                return Err(Error::InvalidConfig(format!(
                    "replica {} listed twice",
                    replica
                )));
            }
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::InvalidConfig(
                "backoff_max_ms must not be below backoff_base_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            deadline: Duration::from_millis(self.connection_timeout_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

/// Delivery budget and backoff schedule for one replica delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub deadline: Duration,
    pub ack_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// Replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Bind address for the HTTP API and RPC endpoints
    #[serde(default = "default_replica_bind")]
    pub bind_addr: SocketAddr,

    /// Base URL of the coordinator (used for log sync)
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Artificial delay before acknowledging a write
    #[serde(default)]
    pub ack_delay_ms: u64,

    /// Fixed delay between failed sync attempts
    #[serde(default = "default_sync_retry")]
    pub sync_retry_ms: u64,

    /// How often the replica checks its log for gaps
    #[serde(default = "default_gap_check_interval")]
    pub gap_check_interval_ms: u64,
}

fn default_replica_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6000))
}
fn default_coordinator_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_sync_retry() -> u64 {
    1_000
}
fn default_gap_check_interval() -> u64 {
    1_000
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_replica_bind(),
            coordinator_url: default_coordinator_url(),
            ack_delay_ms: 0,
            sync_retry_ms: default_sync_retry(),
            gap_check_interval_ms: default_gap_check_interval(),
        }
    }
}

impl ReplicaConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "coordinator_url must be an http(s) URL, got {}",
                self.coordinator_url
            )));
        }
        if self.sync_retry_ms == 0 || self.gap_check_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sync_retry_ms and gap_check_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }

    pub fn sync_retry(&self) -> Duration {
        Duration::from_millis(self.sync_retry_ms)
    }

    pub fn gap_check_interval(&self) -> Duration {
        Duration::from_millis(self.gap_check_interval_ms)
    }
}
