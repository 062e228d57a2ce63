//! Export sinks.
//!
//! A sink receives chunks strictly in order, one call per chunk, and is then
//! either finished or aborted exactly once.

mod file;
mod live;

pub use file::GexfFileSink;
pub use live::{LiveSink, WireMessage};

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::SinkResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    File,
    Live,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Where a finished export ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delivery {
    File { path: PathBuf },
    Stream { endpoint: String, messages: u64 },
}

#[async_trait]
pub trait GraphSink: Send {
    fn kind(&self) -> SinkKind;

    /// Transmit one chunk: its nodes, then its edges.
    async fn send(&mut self, chunk: &Chunk) -> SinkResult<()>;

    /// Complete the output.
    async fn finish(&mut self) -> SinkResult<Delivery>;

    /// Give up, leaving whatever was written marked as incomplete.
    async fn abort(&mut self, reason: &str) -> SinkResult<()>;
}
