//! Export error taxonomy.

use std::fmt;

use leadgraph_builder::BuildError;
use leadgraph_types::RunId;
use leadgraph_watchdog::ThresholdState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sink::SinkKind;

/// Failures of a single sink operation.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("sink already closed")]
    Closed,
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Taxonomy kind of an [`ExportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataSourceUnavailable,
    ResourceExhausted,
    SinkUnavailable,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DataSourceUnavailable => "data_source_unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::SinkUnavailable => "sink_unavailable",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Fatal export failures. Every variant names the run and the last chunk that
/// was fully handed to a sink.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{run_id}: lead store unavailable: {source}")]
    DataSourceUnavailable {
        run_id: RunId,
        last_successful_chunk: Option<u64>,
        #[source]
        source: BuildError,
    },

    #[error("{run_id}: resource pressure {level} did not clear before chunk {chunk_index} after {retries} retries")]
    ResourceExhausted {
        run_id: RunId,
        last_successful_chunk: Option<u64>,
        chunk_index: u64,
        level: ThresholdState,
        retries: u32,
    },

    #[error("{run_id}: {sink} sink unavailable: {source}")]
    SinkUnavailable {
        run_id: RunId,
        last_successful_chunk: Option<u64>,
        sink: SinkKind,
        #[source]
        source: SinkError,
    },

    #[error("{run_id}: export cancelled")]
    Cancelled {
        run_id: RunId,
        last_successful_chunk: Option<u64>,
    },
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DataSourceUnavailable { .. } => ErrorKind::DataSourceUnavailable,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Self::DataSourceUnavailable { run_id, .. }
            | Self::ResourceExhausted { run_id, .. }
            | Self::SinkUnavailable { run_id, .. }
            | Self::Cancelled { run_id, .. } => *run_id,
        }
    }

    pub fn last_successful_chunk(&self) -> Option<u64> {
        match self {
            Self::DataSourceUnavailable {
                last_successful_chunk,
                ..
            }
            | Self::ResourceExhausted {
                last_successful_chunk,
                ..
            }
            | Self::SinkUnavailable {
                last_successful_chunk,
                ..
            }
            | Self::Cancelled {
                last_successful_chunk,
                ..
            } => *last_successful_chunk,
        }
    }
}

pub type ExportOutcome<T> = Result<T, ExportError>;
