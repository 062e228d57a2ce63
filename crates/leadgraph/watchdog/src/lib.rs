#![deny(unsafe_code)]
//! # leadgraph-watchdog
//!
//! Watches GPU memory on the host shared with the inference worker and turns
//! raw samples into a three-level pressure signal.
//!
//! - [`ResourceProbe`]: where samples come from (`nvidia-smi`, static, scripted)
//! - [`ThresholdMachine`]: pure NORMAL / CAUTION / CRITICAL state machine
//! - [`ResourceWatchdog`]: owned sampling task with explicit start/stop that
//!   publishes the latest snapshot and fans out [`WatchdogEvent`]s
//! - [`ResourceGate`]: what the export coordinator consults between chunks
//! - [`EscalationActor`]: runs an [`EscalationAction`] for action-tagged events

mod config;
mod error;
mod escalation;
mod gate;
mod machine;
mod probe;
mod types;
mod watchdog;

pub use config::{EscalationConfig, ProbeConfig, ThresholdConfig, WatchdogConfig};
pub use error::{WatchdogError, WatchdogResult};
pub use escalation::{
    CommandEscalation, EscalationAction, EscalationActor, RecordingEscalation,
};
pub use gate::{FixedGate, ResourceGate, StateReader, WatchdogSnapshot};
pub use machine::ThresholdMachine;
pub use probe::{
    parse_nvidia_smi, probe_from_config, NvidiaSmiProbe, ResourceProbe, ScriptedProbe,
    StaticProbe,
};
pub use types::{EventKind, ResourceSample, ThresholdState, WatchdogAction, WatchdogEvent};
pub use watchdog::ResourceWatchdog;
