//! Export configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chunking and gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// A chunk closes at this many nodes or this many edges.
    pub chunk_size: usize,

    /// Seconds to wait before re-querying the gate.
    pub backoff_secs: u64,

    /// Backoff waits allowed at one chunk boundary.
    pub max_retries: u32,

    /// Capacity of the export alert broadcast channel.
    pub alert_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            backoff_secs: 10,
            max_retries: 3,
            alert_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    /// Final GEXF path. The in-progress document lives next to it with a
    /// `.partial` suffix.
    pub path: PathBuf,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("leadgraph.gexf"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSinkConfig {
    /// Streaming endpoint of the visualization tool.
    pub endpoint: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Idle keep-alive connections kept per host.
    pub pool_max_idle: usize,
}

impl Default for LiveSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/workspace1?operation=updateGraph".to_string(),
            timeout_secs: 5,
            pool_max_idle: 2,
        }
    }
}

impl LiveSinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Output mode selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    #[default]
    File,
    Live,
}

impl std::str::FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown export mode '{}' (expected file or live)", other)),
        }
    }
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Everything an export run needs besides the graph and the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub mode: ExportMode,
    pub coordinator: CoordinatorConfig,
    pub file: FileSinkConfig,
    pub live: LiveSinkConfig,
}
