#![deny(unsafe_code)]
//! # leadgraph-export
//!
//! Moves the lead graph out of the builder and into a visualization tool
//! without starving the co-resident inference worker of GPU memory.
//!
//! - [`ChunkAssembler`] groups builder events into bounded [`Chunk`]s
//! - [`ExportCoordinator`] gates every chunk after the first on a
//!   [`ResourceGate`](leadgraph_watchdog::ResourceGate), backing off while
//!   pressure is elevated
//! - [`GexfFileSink`] writes a GEXF 1.3 document, [`LiveSink`] streams NDJSON
//!   to a graph-streaming endpoint, with file fallback if the stream is down
//!   from the start

mod chunk;
mod config;
mod coordinator;
mod error;
mod sink;

pub use chunk::{Chunk, ChunkAssembler};
pub use config::{CoordinatorConfig, ExportConfig, ExportMode, FileSinkConfig, LiveSinkConfig};
pub use coordinator::{ExportAlert, ExportCoordinator, ExportResult};
pub use error::{ErrorKind, ExportError, ExportOutcome, SinkError, SinkResult};
pub use sink::{Delivery, GexfFileSink, GraphSink, LiveSink, SinkKind, WireMessage};
