//! Chunked, resource-gated export coordinator.
//!
//! Pulls events from the graph builder, groups them into chunks, and hands
//! each chunk to exactly one sink call, strictly in order. Before every chunk
//! after the first the resource gate must read NORMAL; otherwise the
//! coordinator backs off and re-checks up to `max_retries` times before giving
//! up with [`ExportError::ResourceExhausted`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadgraph_builder::{BuildError, BuildStats, GraphEvents};
use leadgraph_types::{GraphEvent, RunId};
use leadgraph_watchdog::{ResourceGate, ThresholdState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunk::{Chunk, ChunkAssembler};
use crate::config::{CoordinatorConfig, ExportConfig, ExportMode};
use crate::error::{ExportError, ExportOutcome, SinkError};
use crate::sink::{Delivery, GexfFileSink, GraphSink, LiveSink, SinkKind};

/// Raised when an export is aborted because resource pressure did not clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportAlert {
    pub run_id: RunId,
    pub chunk_index: u64,
    pub level: ThresholdState,
    pub retries: u32,
    pub at: DateTime<Utc>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub run_id: RunId,
    pub chunks_sent: u64,
    pub nodes_sent: u64,
    pub edges_sent: u64,
    pub stats: BuildStats,
    /// The live sink failed on the first chunk and the run went to file.
    pub fallback: bool,
    pub delivery: Delivery,
}

pub struct ExportCoordinator {
    config: CoordinatorConfig,
    gate: Arc<dyn ResourceGate>,
    alerts: broadcast::Sender<ExportAlert>,
}

impl ExportCoordinator {
    pub fn new(config: CoordinatorConfig, gate: Arc<dyn ResourceGate>) -> Self {
        let (alerts, _) = broadcast::channel(config.alert_capacity.max(1));
        Self {
            config,
            gate,
            alerts,
        }
    }

    /// Alerts are separate from watchdog events.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<ExportAlert> {
        self.alerts.subscribe()
    }

    /// Open the sinks `export` asks for and run. In live mode the file sink
    /// at `export.file.path` is the fallback.
    pub async fn run(
        &self,
        run_id: RunId,
        events: GraphEvents,
        export: &ExportConfig,
        cancel: CancellationToken,
    ) -> ExportOutcome<ExportResult> {
        let unavailable = |sink, source| ExportError::SinkUnavailable {
            run_id,
            last_successful_chunk: None,
            sink,
            source,
        };

        match export.mode {
            ExportMode::File => {
                let sink = GexfFileSink::create(&export.file.path, run_id)
                    .await
                    .map_err(|e| unavailable(SinkKind::File, e))?;
                self.run_with(run_id, events, Box::new(sink), None, cancel)
                    .await
            }
            ExportMode::Live => {
                let sink =
                    LiveSink::new(&export.live).map_err(|e| unavailable(SinkKind::Live, e))?;
                self.run_with(
                    run_id,
                    events,
                    Box::new(sink),
                    Some(export.file.path.clone()),
                    cancel,
                )
                .await
            }
        }
    }

    /// Run against an already opened sink. If `fallback` is set and the
    /// primary is a live sink that fails on the first chunk, the whole run
    /// moves to a GEXF file at that path.
    pub async fn run_with(
        &self,
        run_id: RunId,
        mut events: GraphEvents,
        sink: Box<dyn GraphSink>,
        fallback: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> ExportOutcome<ExportResult> {
        info!(
            run_id = %run_id,
            sink = %sink.kind(),
            chunk_size = self.config.effective_chunk_size(),
            "Starting export run"
        );

        let mut run = Run {
            coordinator: self,
            run_id,
            cancel,
            sink,
            fallback,
            fallback_used: false,
            last_successful_chunk: None,
            chunks_sent: 0,
            nodes_sent: 0,
            edges_sent: 0,
        };
        let mut assembler = ChunkAssembler::new(self.config.effective_chunk_size());

        loop {
            match events.next().await {
                Some(Ok(GraphEvent::PassComplete { pass, emitted })) => {
                    debug!(run_id = %run_id, pass = %pass, emitted, "Builder pass complete");
                }
                Some(Ok(event)) => {
                    if let Some(chunk) = assembler.push(event) {
                        run.deliver(chunk).await?;
                    }
                }
                Some(Err(BuildError::Cancelled)) => {
                    let err = run.cancelled();
                    return Err(run.fail(err).await);
                }
                Some(Err(source)) => {
                    let err = ExportError::DataSourceUnavailable {
                        run_id,
                        last_successful_chunk: run.last_successful_chunk,
                        source,
                    };
                    return Err(run.fail(err).await);
                }
                None => break,
            }
        }

        if let Some(chunk) = assembler.finish() {
            run.deliver(chunk).await?;
        }
        if run.chunks_sent == 0 && run.sink.kind() == SinkKind::Live {
            // Nothing was streamed. Send an empty first chunk so an
            // unreachable endpoint still falls back to the file.
            run.deliver(Chunk::new(0)).await?;
        }

        let delivery = match run.sink.finish().await {
            Ok(delivery) => delivery,
            Err(source) => {
                let err = run.sink_unavailable(source);
                return Err(run.fail(err).await);
            }
        };

        let result = ExportResult {
            run_id,
            chunks_sent: run.chunks_sent,
            nodes_sent: run.nodes_sent,
            edges_sent: run.edges_sent,
            stats: events.stats().clone(),
            fallback: run.fallback_used,
            delivery,
        };
        info!(
            run_id = %run_id,
            chunks = result.chunks_sent,
            nodes = result.nodes_sent,
            edges = result.edges_sent,
            fallback = result.fallback,
            malformed = result.stats.malformed_skipped,
            "Export run complete"
        );
        Ok(result)
    }

    fn raise_alert(&self, alert: ExportAlert) {
        error!(
            target: "leadgraph::alert",
            run_id = %alert.run_id,
            chunk_index = alert.chunk_index,
            level = %alert.level,
            retries = alert.retries,
            "Export aborted: resource pressure did not clear"
        );
        // No subscribers is fine; the log line above is the durable record.
        let _ = self.alerts.send(alert);
    }
}

/// Mutable state of one run.
struct Run<'a> {
    coordinator: &'a ExportCoordinator,
    run_id: RunId,
    cancel: CancellationToken,
    sink: Box<dyn GraphSink>,
    fallback: Option<PathBuf>,
    fallback_used: bool,
    last_successful_chunk: Option<u64>,
    chunks_sent: u64,
    nodes_sent: u64,
    edges_sent: u64,
}

impl Run<'_> {
    async fn deliver(&mut self, chunk: Chunk) -> ExportOutcome<()> {
        if chunk.index > 0 {
            if let Err(err) = self.await_clearance(chunk.index).await {
                return Err(self.fail(err).await);
            }
        }
        if self.cancel.is_cancelled() {
            let err = self.cancelled();
            return Err(self.fail(err).await);
        }

        match self.sink.send(&chunk).await {
            Ok(()) => {}
            Err(source) if chunk.index == 0 && self.sink.kind() == SinkKind::Live => {
                let Some(path) = self.fallback.take() else {
                    let err = self.sink_unavailable(source);
                    return Err(self.fail(err).await);
                };
                self.switch_to_file(path, &chunk, source).await?;
            }
            Err(source) => {
                let err = self.sink_unavailable(source);
                return Err(self.fail(err).await);
            }
        }

        self.last_successful_chunk = Some(chunk.index);
        self.chunks_sent += 1;
        self.nodes_sent += chunk.nodes.len() as u64;
        self.edges_sent += chunk.edges.len() as u64;
        debug!(
            run_id = %self.run_id,
            chunk_index = chunk.index,
            nodes = chunk.nodes.len(),
            edges = chunk.edges.len(),
            "Chunk delivered"
        );
        Ok(())
    }

    /// Replace a live sink that failed on the first chunk with a file sink
    /// and resend that chunk there.
    async fn switch_to_file(
        &mut self,
        path: PathBuf,
        chunk: &Chunk,
        cause: SinkError,
    ) -> ExportOutcome<()> {
        warn!(
            run_id = %self.run_id,
            error = %cause,
            path = %path.display(),
            "Live sink unavailable; falling back to file export"
        );
        if let Err(e) = self.sink.abort("falling back to file export").await {
            debug!(error = %e, "Abort of live sink failed");
        }

        let file = GexfFileSink::create(&path, self.run_id)
            .await
            .map_err(|source| ExportError::SinkUnavailable {
                run_id: self.run_id,
                last_successful_chunk: None,
                sink: SinkKind::File,
                source,
            })?;
        self.sink = Box::new(file);
        self.fallback_used = true;

        if let Err(source) = self.sink.send(chunk).await {
            let err = self.sink_unavailable(source);
            return Err(self.fail(err).await);
        }
        Ok(())
    }

    /// Wait until the gate reads NORMAL or the retry budget is spent.
    async fn await_clearance(&self, chunk_index: u64) -> ExportOutcome<()> {
        let config = &self.coordinator.config;
        let mut level = self.coordinator.gate.level();
        let mut retries = 0;

        while !level.is_normal() {
            if retries >= config.max_retries {
                let alert = ExportAlert {
                    run_id: self.run_id,
                    chunk_index,
                    level,
                    retries,
                    at: Utc::now(),
                };
                self.coordinator.raise_alert(alert);
                return Err(ExportError::ResourceExhausted {
                    run_id: self.run_id,
                    last_successful_chunk: self.last_successful_chunk,
                    chunk_index,
                    level,
                    retries,
                });
            }

            retries += 1;
            warn!(
                run_id = %self.run_id,
                chunk_index,
                level = %level,
                retry = retries,
                max_retries = config.max_retries,
                backoff_secs = config.backoff().as_secs(),
                "Resource pressure; backing off before next chunk"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(config.backoff()) => {}
            }
            level = self.coordinator.gate.level();
        }

        if retries > 0 {
            info!(run_id = %self.run_id, chunk_index, retries, "Resource pressure cleared");
        }
        Ok(())
    }

    fn cancelled(&self) -> ExportError {
        ExportError::Cancelled {
            run_id: self.run_id,
            last_successful_chunk: self.last_successful_chunk,
        }
    }

    fn sink_unavailable(&self, source: SinkError) -> ExportError {
        ExportError::SinkUnavailable {
            run_id: self.run_id,
            last_successful_chunk: self.last_successful_chunk,
            sink: self.sink.kind(),
            source,
        }
    }

    /// Close the sink as incomplete and hand back `err`.
    async fn fail(&mut self, err: ExportError) -> ExportError {
        if let Err(e) = self.sink.abort(&err.to_string()).await {
            warn!(run_id = %self.run_id, error = %e, "Could not mark output incomplete");
        }
        error!(
            run_id = %self.run_id,
            kind = %err.kind(),
            last_successful_chunk = ?err.last_successful_chunk(),
            error = %err,
            "Export run failed"
        );
        err
    }
}
