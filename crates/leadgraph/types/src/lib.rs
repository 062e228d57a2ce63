#![deny(unsafe_code)]
//! # leadgraph-types
//!
//! Shared vocabulary of the leadgraph export pipeline.
//!
//! - [`LeadRecord`] / [`RawLeadRow`]: observed entities as read from the lead store
//! - [`GraphNode`] / [`GraphEdge`]: the bipartite target/footprint graph
//! - [`GraphEvent`]: the lazy event sequence produced by the graph builder
//! - [`RunId`]: identifier attached to every export run and every failure

pub mod graph;
pub mod ids;
pub mod lead;

pub use graph::{
    footprint_node_id, target_node_id, AttrValue, BuildPass, EdgeKind, FootprintNode, GraphEdge,
    GraphEvent, GraphNode, NodeClass, TargetNode,
};
pub use ids::{LeadId, RunId};
pub use lead::{
    normalize_artifact, LeadFilter, LeadRecord, MalformedLead, RawLeadRow, DEFAULT_INCIDENT_CATEGORY,
    DEFAULT_SOURCE, DEFAULT_VERDICT,
};
