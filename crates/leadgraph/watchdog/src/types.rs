//! Samples, levels and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pressure level derived from GPU memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdState {
    Normal,
    Caution,
    Critical,
}

impl ThresholdState {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl fmt::Display for ThresholdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Caution => write!(f, "CAUTION"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One probe reading, summed over all devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub used_mb: u64,
    pub total_mb: u64,
    pub at: DateTime<Utc>,
}

impl ResourceSample {
    pub fn new(used_mb: u64, total_mb: u64) -> Self {
        Self {
            used_mb,
            total_mb,
            at: Utc::now(),
        }
    }

    /// Percentage of total memory in use; 0 when the total is unknown.
    pub fn pct(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        let pct = self.used_mb as f64 * 100.0 / self.total_mb as f64;
        (pct * 10.0).round() / 10.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sample,
    Transition,
    Escalation,
}

/// Action tags carried by events that call for intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogAction {
    /// Pressure has stayed outside NORMAL for the sustained-caution window.
    EscalateSustainedPressure,
    /// The machine has just entered CRITICAL.
    CriticalPressure,
}

impl WatchdogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EscalateSustainedPressure => "escalate_sustained_pressure",
            Self::CriticalPressure => "critical_pressure",
        }
    }
}

impl fmt::Display for WatchdogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watchdog event stream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogEvent {
    pub kind: EventKind,
    pub level: ThresholdState,
    pub used_mb: u64,
    pub total_mb: u64,
    pub pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<WatchdogAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ThresholdState>,
    pub at: DateTime<Utc>,
}

impl WatchdogEvent {
    pub(crate) fn from_sample(kind: EventKind, level: ThresholdState, sample: &ResourceSample) -> Self {
        Self {
            kind,
            level,
            used_mb: sample.used_mb,
            total_mb: sample.total_mb,
            pct: sample.pct(),
            action: None,
            from: None,
            at: sample.at,
        }
    }

    pub(crate) fn with_action(mut self, action: WatchdogAction) -> Self {
        self.action = Some(action);
        self
    }

    pub(crate) fn with_from(mut self, from: ThresholdState) -> Self {
        self.from = Some(from);
        self
    }
}
