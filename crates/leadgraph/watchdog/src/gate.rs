//! Read side of the watchdog.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::types::{ResourceSample, ThresholdState};

/// Answers "may the next chunk go out?" for the export coordinator.
pub trait ResourceGate: Send + Sync {
    fn level(&self) -> ThresholdState;
}

/// Latest watchdog state, published after every probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogSnapshot {
    pub level: ThresholdState,
    pub last_sample: Option<ResourceSample>,
    pub samples: u64,
    pub probe_failures: u64,
}

impl Default for WatchdogSnapshot {
    fn default() -> Self {
        Self {
            level: ThresholdState::Normal,
            last_sample: None,
            samples: 0,
            probe_failures: 0,
        }
    }
}

/// Cheap, cloneable view of the watchdog's snapshot cell.
#[derive(Debug, Clone)]
pub struct StateReader {
    rx: watch::Receiver<WatchdogSnapshot>,
}

impl StateReader {
    pub(crate) fn new(rx: watch::Receiver<WatchdogSnapshot>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> WatchdogSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until the watchdog publishes a new snapshot. Returns `false` once
    /// the watchdog has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl ResourceGate for StateReader {
    fn level(&self) -> ThresholdState {
        let snapshot = self.rx.borrow();
        if snapshot.last_sample.is_none() {
            // A host without a working probe must not block exports.
            warn!(
                probe_failures = snapshot.probe_failures,
                "No resource sample yet; treating pressure as NORMAL"
            );
            return ThresholdState::Normal;
        }
        snapshot.level
    }
}

/// Gate pinned to one level, for dry runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedGate(pub ThresholdState);

impl ResourceGate for FixedGate {
    fn level(&self) -> ThresholdState {
        self.0
    }
}
