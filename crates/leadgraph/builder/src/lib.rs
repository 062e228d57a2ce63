#![deny(unsafe_code)]
//! # leadgraph-builder
//!
//! Turns paginated lead rows into the bipartite target/footprint graph.
//!
//! The builder runs three strictly sequential passes and exposes the result as
//! a lazy, non-restartable [`GraphEvents`] sequence:
//!
//! 1. **Targets**: one node per distinct lead id, emitted while paging.
//! 2. **Footprints**: one node per distinct normalized artifact, plus one
//!    ownership edge per (target, footprint) pair.
//! 3. **Co-occurrence**: one weighted edge per pair of targets sharing at
//!    least one footprint.
//!
//! Only the lead id -> artifact lists, the footprint index and the pair
//! counters are held in memory; rows are never retained after pass 1.

mod config;
mod error;
mod events;
mod stats;

pub use config::BuilderConfig;
pub use error::{BuildError, BuildResult};
pub use events::{GraphBuilder, GraphEvents};
pub use stats::BuildStats;
