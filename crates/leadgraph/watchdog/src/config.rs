//! Watchdog configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// GPU memory thresholds in MB. `caution_mb` must be below `critical_mb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub caution_mb: u64,
    pub critical_mb: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            caution_mb: 6144,
            critical_mb: 7168,
        }
    }
}

/// Where samples come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeConfig {
    /// Query `nvidia-smi`, summing over all GPUs.
    NvidiaSmi {
        #[serde(default = "default_nvidia_smi")]
        command: String,
        #[serde(default = "default_probe_timeout")]
        timeout_secs: u64,
    },
    /// Always report the same usage. Useful for dry runs on hosts without a GPU.
    Static { used_mb: u64, total_mb: u64 },
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig::NvidiaSmi {
            command: default_nvidia_smi(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_nvidia_smi() -> String {
    "nvidia-smi".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Seconds between samples; the first sample is taken at start.
    pub sample_interval_secs: u64,

    /// Seconds outside NORMAL before the escalation signal fires.
    pub sustained_caution_secs: u64,

    pub thresholds: ThresholdConfig,

    pub probe: ProbeConfig,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10,
            sustained_caution_secs: 30,
            thresholds: ThresholdConfig::default(),
            probe: ProbeConfig::default(),
            event_capacity: 256,
        }
    }
}

impl WatchdogConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    pub fn sustained_caution(&self) -> Duration {
        Duration::from_secs(self.sustained_caution_secs)
    }
}

/// Escalation actor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Program and arguments run for each action-tagged event. Empty disables
    /// the actor.
    pub command: Vec<String>,

    /// Seconds before a running command is killed.
    pub timeout_secs: Option<u64>,
}

impl EscalationConfig {
    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WatchdogConfig::default();
        assert_eq!(config.sample_interval(), Duration::from_secs(10));
        assert_eq!(config.sustained_caution(), Duration::from_secs(30));
        assert_eq!(config.thresholds.caution_mb, 6144);
        assert_eq!(config.thresholds.critical_mb, 7168);
        assert!(!EscalationConfig::default().is_enabled());
    }

    #[test]
    fn probe_config_is_tagged() {
        let probe: ProbeConfig =
            serde_json::from_str(r#"{"type":"static","used_mb":100,"total_mb":8192}"#).unwrap();
        assert_eq!(
            probe,
            ProbeConfig::Static {
                used_mb: 100,
                total_mb: 8192
            }
        );

        let smi: ProbeConfig = serde_json::from_str(r#"{"type":"nvidia_smi"}"#).unwrap();
        assert_eq!(smi, ProbeConfig::default());
    }
}
