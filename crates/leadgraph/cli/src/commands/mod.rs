//! CLI command implementations

pub mod export;
pub mod watch;

use anyhow::Context;
use leadgraph_watchdog::{
    probe_from_config, CommandEscalation, EscalationActor, EscalationConfig, ResourceWatchdog,
    WatchdogConfig,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A started watchdog plus its escalation actor, if one is configured.
pub(crate) struct RunningWatchdog {
    pub watchdog: ResourceWatchdog,
    actor: Option<(CancellationToken, JoinHandle<u64>)>,
}

impl RunningWatchdog {
    pub fn start(config: &WatchdogConfig, escalation: &EscalationConfig) -> anyhow::Result<Self> {
        let probe = probe_from_config(&config.probe);
        let mut watchdog = ResourceWatchdog::new(config.clone(), probe)
            .context("invalid watchdog configuration")?;

        let actor = match CommandEscalation::from_config(escalation) {
            Some(action) => {
                let cancel = CancellationToken::new();
                let handle = EscalationActor::new(Arc::new(action))
                    .spawn(watchdog.subscribe(), cancel.clone());
                Some((cancel, handle))
            }
            None => {
                info!("No escalation command configured; escalations are logged only");
                None
            }
        };

        watchdog.start().context("failed to start watchdog")?;
        Ok(Self { watchdog, actor })
    }

    pub async fn stop(mut self) {
        self.watchdog.stop().await;
        if let Some((cancel, handle)) = self.actor.take() {
            cancel.cancel();
            match handle.await {
                Ok(executed) => info!(executed, "Escalation actor stopped"),
                Err(e) => warn!(error = %e, "Escalation actor task failed"),
            }
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
