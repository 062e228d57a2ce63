//! Configuration for the leadgraph binary

use leadgraph_builder::BuilderConfig;
use leadgraph_export::ExportConfig;
use leadgraph_store::StoreConfig;
use leadgraph_watchdog::{EscalationConfig, WatchdogConfig};
use serde::{Deserialize, Serialize};

/// Complete configuration, composed from each crate's section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadgraphConfig {
    /// Lead store
    #[serde(default)]
    pub store: StoreConfig,

    /// Graph builder
    #[serde(default)]
    pub builder: BuilderConfig,

    /// GPU memory watchdog
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Action run on watchdog escalations
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Export mode, chunking and sinks
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LeadgraphConfig {
    /// Load configuration from defaults, an optional file and `LEADGRAPH_*`
    /// environment variables, in increasing precedence.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `LEADGRAPH_EXPORT__COORDINATOR__CHUNK_SIZE=2000`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&LeadgraphConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LEADGRAPH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
