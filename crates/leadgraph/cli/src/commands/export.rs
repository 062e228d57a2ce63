//! `leadgraph export`

use super::{shutdown_signal, RunningWatchdog};
use crate::config::LeadgraphConfig;
use anyhow::Context;
use clap::Args;
use leadgraph_builder::GraphBuilder;
use leadgraph_export::{ExportCoordinator, ExportMode};
use leadgraph_store::{open_store, StoreConfig};
use leadgraph_types::{LeadFilter, RunId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for the watchdog's first sample before gating on
/// whatever the reader reports.
const FIRST_SAMPLE_WAIT: Duration = Duration::from_secs(10);

#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Output mode: file or live
    #[arg(short, long)]
    pub mode: Option<ExportMode>,

    /// GEXF output path (also the fallback in live mode)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Graph-streaming endpoint for live mode
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Read leads from a JSON snapshot instead of the configured store
    #[arg(long, conflicts_with = "database")]
    pub leads_json: Option<PathBuf>,

    /// SQLite connection URL
    #[arg(long)]
    pub database: Option<String>,

    /// Nodes or edges per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Leads fetched per store page
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Minimum confidence
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Incident category
    #[arg(long)]
    pub category: Option<String>,

    /// Verdict
    #[arg(long)]
    pub verdict: Option<String>,

    /// Lead source
    #[arg(long)]
    pub source: Option<String>,

    /// Case-insensitive substring of the lead name
    #[arg(long)]
    pub name: Option<String>,
}

impl ExportArgs {
    fn apply(&self, config: &mut LeadgraphConfig) {
        if let Some(mode) = self.mode {
            config.export.mode = mode;
        }
        if let Some(output) = &self.output {
            config.export.file.path = output.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.export.live.endpoint = endpoint.clone();
        }
        if let Some(path) = &self.leads_json {
            config.store = StoreConfig::Json { path: path.clone() };
        }
        if let Some(url) = &self.database {
            let base = match &config.store {
                sqlite @ StoreConfig::Sqlite { .. } => sqlite.clone(),
                StoreConfig::Json { .. } => StoreConfig::default(),
            };
            if let StoreConfig::Sqlite {
                max_connections,
                connect_timeout_secs,
                ..
            } = base
            {
                config.store = StoreConfig::Sqlite {
                    url: url.clone(),
                    max_connections,
                    connect_timeout_secs,
                };
            }
        }
        if let Some(size) = self.chunk_size {
            config.export.coordinator.chunk_size = size;
        }
        if let Some(size) = self.page_size {
            config.builder.page_size = size;
        }
    }

    fn filter(&self) -> LeadFilter {
        LeadFilter {
            min_confidence: self.min_confidence,
            incident_category: self.category.clone(),
            verdict: self.verdict.clone(),
            source: self.source.clone(),
            name_contains: self.name.clone(),
        }
    }
}

/// Run one export and print its result as JSON on stdout.
pub async fn execute(args: ExportArgs, mut config: LeadgraphConfig) -> anyhow::Result<()> {
    args.apply(&mut config);
    let filter = args.filter();

    let store = open_store(&config.store)
        .await
        .context("failed to open lead store")?;

    let running = RunningWatchdog::start(&config.watchdog, &config.escalation)?;
    let mut reader = running.watchdog.reader();
    if tokio::time::timeout(FIRST_SAMPLE_WAIT, reader.changed())
        .await
        .is_err()
    {
        warn!("No watchdog sample yet; first gate check will treat pressure as normal");
    }

    let cancel = CancellationToken::new();
    let signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let run_id = RunId::generate();
    info!(run_id = %run_id, mode = %config.export.mode, filter = ?filter, "Export requested");

    let events = GraphBuilder::new(config.builder.clone()).build(store, filter, cancel.clone());
    let coordinator = ExportCoordinator::new(config.export.coordinator.clone(), Arc::new(reader));
    let outcome = coordinator
        .run(run_id, events, &config.export, cancel)
        .await;

    signal.abort();
    running.stop().await;

    let result = outcome.with_context(|| format!("export {} failed", run_id))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = ExportArgs {
            mode: Some(ExportMode::Live),
            output: Some(PathBuf::from("/tmp/out.gexf")),
            endpoint: Some("http://gephi:8080/ws?operation=updateGraph".into()),
            leads_json: Some(PathBuf::from("/tmp/leads.json")),
            chunk_size: Some(100),
            page_size: Some(50),
            ..Default::default()
        };
        let mut config = LeadgraphConfig::default();
        args.apply(&mut config);

        assert_eq!(config.export.mode, ExportMode::Live);
        assert_eq!(config.export.file.path, PathBuf::from("/tmp/out.gexf"));
        assert_eq!(config.export.coordinator.chunk_size, 100);
        assert_eq!(config.builder.page_size, 50);
        assert_eq!(
            config.store,
            StoreConfig::Json {
                path: PathBuf::from("/tmp/leads.json")
            }
        );
    }

    #[test]
    fn database_flag_keeps_pool_settings() {
        let args = ExportArgs {
            database: Some("sqlite:///srv/leads.db?mode=ro".into()),
            ..Default::default()
        };
        let mut config = LeadgraphConfig::default();
        args.apply(&mut config);

        match config.store {
            StoreConfig::Sqlite {
                url,
                max_connections,
                ..
            } => {
                assert_eq!(url, "sqlite:///srv/leads.db?mode=ro");
                assert_eq!(max_connections, 4);
            }
            other => panic!("unexpected store {:?}", other),
        }
    }

    #[test]
    fn filter_from_flags() {
        let args = ExportArgs {
            min_confidence: Some(0.5),
            verdict: Some("malicious".into()),
            name: Some("acme".into()),
            ..Default::default()
        };
        let filter = args.filter();
        assert_eq!(filter.min_confidence, Some(0.5));
        assert_eq!(filter.verdict.as_deref(), Some("malicious"));
        assert_eq!(filter.name_contains.as_deref(), Some("acme"));
        assert!(filter.incident_category.is_none());
        assert!(ExportArgs::default().filter().is_empty());
    }
}
