//! The sampling task.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::gate::{StateReader, WatchdogSnapshot};
use crate::machine::ThresholdMachine;
use crate::probe::ResourceProbe;
use crate::types::WatchdogEvent;

/// Owned GPU memory watchdog.
///
/// Construct it, hand [`reader`](Self::reader)s to consumers, then
/// [`start`](Self::start) it. Only the sampling task writes the snapshot cell.
pub struct ResourceWatchdog {
    config: WatchdogConfig,
    probe: Arc<dyn ResourceProbe>,
    state_tx: Arc<watch::Sender<WatchdogSnapshot>>,
    event_tx: broadcast::Sender<WatchdogEvent>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ResourceWatchdog {
    /// Create a stopped watchdog. Fails on invalid thresholds.
    pub fn new(config: WatchdogConfig, probe: Arc<dyn ResourceProbe>) -> WatchdogResult<Self> {
        ThresholdMachine::new(config.thresholds, config.sustained_caution())?;
        let (state_tx, _) = watch::channel(WatchdogSnapshot::default());
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            config,
            probe,
            state_tx: Arc::new(state_tx),
            event_tx,
            running: None,
        })
    }

    pub fn reader(&self) -> StateReader {
        StateReader::new(self.state_tx.subscribe())
    }

    /// Subscribe to sample, transition and escalation events. Slow
    /// subscribers lag and lose old events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the sampling task. The first sample is taken immediately.
    pub fn start(&mut self) -> WatchdogResult<()> {
        if self.is_running() {
            return Err(WatchdogError::AlreadyRunning);
        }

        let machine = ThresholdMachine::new(self.config.thresholds, self.config.sustained_caution())?;
        let cancel = CancellationToken::new();
        let task = SamplingTask {
            probe: self.probe.clone(),
            machine,
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
        };

        info!(
            probe = self.probe.name(),
            interval_secs = self.config.sample_interval().as_secs(),
            caution_mb = self.config.thresholds.caution_mb,
            critical_mb = self.config.thresholds.critical_mb,
            "Starting resource watchdog"
        );

        let handle = tokio::spawn(task.run(self.config.sample_interval(), cancel.clone()));
        self.running = Some((cancel, handle));
        Ok(())
    }

    /// Stop sampling and wait for the task to exit. Stopping a stopped
    /// watchdog is a no-op.
    pub async fn stop(&mut self) {
        if let Some((cancel, handle)) = self.running.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Watchdog task ended abnormally");
            }
            info!("Resource watchdog stopped");
        }
    }
}

impl Drop for ResourceWatchdog {
    fn drop(&mut self) {
        if let Some((cancel, _)) = &self.running {
            cancel.cancel();
        }
    }
}

struct SamplingTask {
    probe: Arc<dyn ResourceProbe>,
    machine: ThresholdMachine,
    state_tx: Arc<watch::Sender<WatchdogSnapshot>>,
    event_tx: broadcast::Sender<WatchdogEvent>,
}

impl SamplingTask {
    async fn run(mut self, interval: std::time::Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sample = tokio::select! {
                _ = cancel.cancelled() => break,
                sample = self.probe.sample() => sample,
            };

            match sample {
                Ok(sample) => {
                    let events = self.machine.observe(&sample, Instant::now());
                    let level = self.machine.state();
                    self.state_tx.send_modify(|s| {
                        s.level = level;
                        s.last_sample = Some(sample);
                        s.samples += 1;
                    });
                    for event in events {
                        // No subscribers is fine.
                        let _ = self.event_tx.send(event);
                    }
                }
                Err(e) => {
                    warn!(probe = self.probe.name(), error = %e, "Resource probe failed; sample skipped");
                    self.state_tx.send_modify(|s| s.probe_failures += 1);
                }
            }
        }

        debug!("Sampling task exiting");
    }
}
