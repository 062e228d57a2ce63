//! Error types for the watchdog.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("invalid thresholds: caution {caution_mb} MB must be below critical {critical_mb} MB")]
    InvalidThresholds { caution_mb: u64, critical_mb: u64 },

    #[error("probe could not run: {0}")]
    ProbeUnavailable(String),

    #[error("probe timed out after {0} s")]
    ProbeTimeout(u64),

    #[error("unexpected probe output: {0}")]
    ProbeOutput(String),

    #[error("watchdog already running")]
    AlreadyRunning,

    #[error("escalation failed: {0}")]
    EscalationFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WatchdogResult<T> = Result<T, WatchdogError>;
