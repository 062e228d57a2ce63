//! Threshold state machine.
//!
//! Transitions:
//! - Normal -> Caution when usage >= caution and < critical
//! - Normal | Caution -> Critical when usage >= critical
//! - any -> Normal when usage < caution
//! - Critical is held while usage stays >= caution
//!
//! Leaving Normal starts a breach timer. Once the breach has lasted the
//! sustained-caution window an escalation event fires, once per breach.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ThresholdConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::types::{EventKind, ResourceSample, ThresholdState, WatchdogAction, WatchdogEvent};

/// Pure pressure classifier. Holds no clock; callers pass the observation time.
#[derive(Debug, Clone)]
pub struct ThresholdMachine {
    thresholds: ThresholdConfig,
    sustained: Duration,
    state: ThresholdState,
    breach_started: Option<Instant>,
    escalated: bool,
}

impl ThresholdMachine {
    pub fn new(thresholds: ThresholdConfig, sustained: Duration) -> WatchdogResult<Self> {
        if thresholds.caution_mb >= thresholds.critical_mb {
            return Err(WatchdogError::InvalidThresholds {
                caution_mb: thresholds.caution_mb,
                critical_mb: thresholds.critical_mb,
            });
        }
        Ok(Self {
            thresholds,
            sustained,
            state: ThresholdState::Normal,
            breach_started: None,
            escalated: false,
        })
    }

    pub fn state(&self) -> ThresholdState {
        self.state
    }

    /// Level a single reading maps to, ignoring history.
    pub fn classify(&self, used_mb: u64) -> ThresholdState {
        if used_mb >= self.thresholds.critical_mb {
            ThresholdState::Critical
        } else if used_mb >= self.thresholds.caution_mb {
            ThresholdState::Caution
        } else {
            ThresholdState::Normal
        }
    }

    /// Feed one sample. Returns the sample event, then any transition and
    /// escalation events it caused.
    pub fn observe(&mut self, sample: &ResourceSample, now: Instant) -> Vec<WatchdogEvent> {
        let previous = self.state;
        let next = match (previous, self.classify(sample.used_mb)) {
            (ThresholdState::Critical, ThresholdState::Caution) => ThresholdState::Critical,
            (_, observed) => observed,
        };
        self.state = next;

        let mut events = vec![WatchdogEvent::from_sample(EventKind::Sample, next, sample)];

        if next != previous {
            let mut transition = WatchdogEvent::from_sample(EventKind::Transition, next, sample)
                .with_from(previous);
            if next == ThresholdState::Critical {
                transition = transition.with_action(WatchdogAction::CriticalPressure);
            }
            if next.is_normal() {
                info!(from = %previous, used_mb = sample.used_mb, "GPU memory pressure recovered");
            } else {
                warn!(from = %previous, to = %next, used_mb = sample.used_mb, "GPU memory pressure rising");
            }
            events.push(transition);
        }

        if next.is_normal() {
            self.breach_started = None;
            self.escalated = false;
            return events;
        }

        let started = *self.breach_started.get_or_insert(now);
        if !self.escalated && now.saturating_duration_since(started) >= self.sustained {
            self.escalated = true;
            warn!(
                level = %next,
                breach_secs = now.saturating_duration_since(started).as_secs(),
                "Sustained GPU memory pressure"
            );
            events.push(
                WatchdogEvent::from_sample(EventKind::Escalation, next, sample)
                    .with_action(WatchdogAction::EscalateSustainedPressure),
            );
        }

        events
    }
}
