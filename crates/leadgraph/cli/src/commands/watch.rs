//! `leadgraph watch`

use super::{shutdown_signal, RunningWatchdog};
use crate::config::LeadgraphConfig;
use clap::Args;
use leadgraph_watchdog::{EventKind, ProbeConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    /// Seconds between samples
    #[arg(long)]
    pub interval: Option<u64>,

    /// Only print transitions and escalations
    #[arg(long)]
    pub quiet: bool,

    /// Sample a fixed reading instead of nvidia-smi (used MB)
    #[arg(long, value_name = "USED_MB")]
    pub static_used: Option<u64>,
}

/// Print watchdog events as JSON lines until interrupted.
pub async fn execute(args: WatchArgs, mut config: LeadgraphConfig) -> anyhow::Result<()> {
    if let Some(secs) = args.interval {
        config.watchdog.sample_interval_secs = secs;
    }
    if let Some(used_mb) = args.static_used {
        config.watchdog.probe = ProbeConfig::Static {
            used_mb,
            total_mb: config.watchdog.thresholds.critical_mb.max(used_mb),
        };
    }

    let running = RunningWatchdog::start(&config.watchdog, &config.escalation)?;
    let mut events = running.watchdog.subscribe();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                if args.quiet && event.kind == EventKind::Sample {
                    continue;
                }
                println!("{}", serde_json::to_string(&event)?);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Output fell behind watchdog events");
            }
            Err(RecvError::Closed) => break,
        }
    }

    running.stop().await;
    Ok(())
}
