//! Escalation actor.
//!
//! Subscribes to the watchdog event stream and runs an [`EscalationAction`]
//! for every event that carries an action tag. The actor shares no state with
//! the export coordinator.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EscalationConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::types::WatchdogEvent;

#[async_trait]
pub trait EscalationAction: Send + Sync {
    async fn execute(&self, event: &WatchdogEvent) -> WatchdogResult<()>;

    fn name(&self) -> &str;
}

/// Runs an external command, e.g. to pause a co-resident inference worker.
///
/// The event is passed through `LEADGRAPH_ACTION`, `LEADGRAPH_LEVEL` and
/// `LEADGRAPH_USED_MB`.
#[derive(Debug, Clone)]
pub struct CommandEscalation {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEscalation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &EscalationConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), config.timeout()))
    }
}

#[async_trait]
impl EscalationAction for CommandEscalation {
    async fn execute(&self, event: &WatchdogEvent) -> WatchdogResult<()> {
        let action = event.action.map(|a| a.as_str()).unwrap_or_default();
        let status = Command::new(&self.program)
            .args(&self.args)
            .env("LEADGRAPH_ACTION", action)
            .env("LEADGRAPH_LEVEL", event.level.to_string())
            .env("LEADGRAPH_USED_MB", event.used_mb.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status();

        let status = tokio::time::timeout(self.timeout, status)
            .await
            .map_err(|_| {
                WatchdogError::EscalationFailed(format!(
                    "{} timed out after {} s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })??;

        if !status.success() {
            return Err(WatchdogError::EscalationFailed(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Records every event it is asked to act on.
#[derive(Debug, Clone, Default)]
pub struct RecordingEscalation {
    seen: Arc<Mutex<Vec<WatchdogEvent>>>,
}

impl RecordingEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<WatchdogEvent> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl EscalationAction for RecordingEscalation {
    async fn execute(&self, event: &WatchdogEvent) -> WatchdogResult<()> {
        self.seen.lock().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub struct EscalationActor {
    action: Arc<dyn EscalationAction>,
}

impl EscalationActor {
    pub fn new(action: Arc<dyn EscalationAction>) -> Self {
        Self { action }
    }

    /// Run until cancelled or the event stream closes. The task yields the
    /// number of actions executed successfully.
    pub fn spawn(
        self,
        events: broadcast::Receiver<WatchdogEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<u64> {
        tokio::spawn(self.run(events, cancel))
    }

    async fn run(
        self,
        mut events: broadcast::Receiver<WatchdogEvent>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut executed = 0;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            let event = match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Escalation actor lagged behind watchdog events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(action) = event.action else {
                continue;
            };

            info!(action = %action, level = %event.level, handler = self.action.name(), "Running escalation");
            match self.action.execute(&event).await {
                Ok(()) => executed += 1,
                Err(e) => error!(action = %action, error = %e, "Escalation failed"),
            }
        }
        executed
    }
}
