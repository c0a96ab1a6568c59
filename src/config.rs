//! config.rs
//! Engine tuning: worker pool, per-node timeouts and graph-build limits.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads executing nodes; also the cap on nodes in flight.
    pub max_concurrency: usize,
    /// Per-node execution timeout. `None` waits indefinitely.
    pub node_timeout_ms: Option<u64>,
    /// Prefix for worker thread names.
    pub thread_name: String,
    /// Recursion guard for graph building.
    pub max_resolution_depth: usize,
    pub prune_unused_nodes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            node_timeout_ms: None,
            thread_name: "prism-worker".to_string(),
            max_resolution_depth: crate::graph::DEFAULT_MAX_DEPTH,
            prune_unused_nodes: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self { Self::default() }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    /// Parses and validates a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading engine config from {}", path.as_ref().display());
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.node_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("node_timeout_ms must be positive".into()));
        }
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::Invalid("max_resolution_depth must be at least 1".into()));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }
}
