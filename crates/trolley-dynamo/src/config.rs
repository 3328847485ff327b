//! Cluster configuration.
//!
//! Values come from defaults, an optional file (YAML, TOML or JSON) and
//! `TROLLEY_*` environment variables, in increasing order of precedence.
//! Nested keys use a double underscore, e.g. `TROLLEY_REPLICATION__W=3`.

use crate::error::{DynamoError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replication factor and read/write quorums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replicas per key
    pub n: usize,
    /// Replies needed for a read
    pub r: usize,
    /// Acknowledgements needed for a write
    pub w: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { n: 3, r: 2, w: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub replication: ReplicationConfig,
    /// Ring positions per physical node
    pub virtual_nodes: usize,
    /// Upper bound for every cross-node call
    pub request_timeout_ms: u64,
    pub gossip_interval_ms: u64,
    pub anti_entropy_interval_ms: u64,
    /// Pending snapshots per list store before the overflow policy applies
    pub persistence_queue_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            virtual_nodes: 10,
            request_timeout_ms: 1000,
            gossip_interval_ms: 1000,
            anti_entropy_interval_ms: 5000,
            persistence_queue_capacity: 1024,
        }
    }
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("TROLLEY").separator("__"))
            .build()
            .map_err(|e| DynamoError::Config(e.to_string()))?;

        let config: ClusterConfig = settings
            .try_deserialize()
            .map_err(|e| DynamoError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ReplicationConfig { n, r, w } = self.replication;
        if n == 0 {
            return Err(DynamoError::Config("replication.n must be at least 1".into()));
        }
        if r == 0 || r > n {
            return Err(DynamoError::Config(format!(
                "replication.r must be in 1..={n}, got {r}"
            )));
        }
        if w == 0 || w > n {
            return Err(DynamoError::Config(format!(
                "replication.w must be in 1..={n}, got {w}"
            )));
        }
        if self.virtual_nodes == 0 {
            return Err(DynamoError::Config("virtual_nodes must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(DynamoError::Config("request_timeout_ms must be positive".into()));
        }
        if self.gossip_interval_ms == 0 {
            return Err(DynamoError::Config("gossip_interval_ms must be positive".into()));
        }
        if self.anti_entropy_interval_ms == 0 {
            return Err(DynamoError::Config("anti_entropy_interval_ms must be positive".into()));
        }
        if self.persistence_queue_capacity == 0 {
            return Err(DynamoError::Config("persistence_queue_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn anti_entropy_interval(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_interval_ms)
    }
}

/// Builder for cluster configuration.
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    pub fn replication(mut self, n: usize, r: usize, w: usize) -> Self {
        self.config.replication = ReplicationConfig { n, r, w };
        self
    }

    pub fn virtual_nodes(mut self, count: usize) -> Self {
        self.config.virtual_nodes = count;
        self
    }

    pub fn request_timeout(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn gossip_interval(mut self, ms: u64) -> Self {
        self.config.gossip_interval_ms = ms;
        self
    }

    pub fn anti_entropy_interval(mut self, ms: u64) -> Self {
        self.config.anti_entropy_interval_ms = ms;
        self
    }

    pub fn persistence_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.persistence_queue_capacity = capacity;
        self
    }

    /// Finish, rejecting inconsistent settings.
    pub fn build(self) -> Result<ClusterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
