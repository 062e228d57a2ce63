//! Chunk assembly.
//!
//! A chunk closes when it holds `chunk_size` nodes or `chunk_size` edges,
//! whichever comes first, or when the event sequence ends. Edges stay in the
//! chunk that is open when they arrive, so an edge's endpoints are always in
//! the same chunk or an earlier one.

use leadgraph_types::{GraphEdge, GraphEvent, GraphNode};

/// A bounded slice of the graph handed to a sink in one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// Zero-based, strictly increasing within a run.
    pub index: u64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Chunk {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }
}

#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_size: usize,
    current: Chunk,
}

impl ChunkAssembler {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            current: Chunk::new(0),
        }
    }

    /// Add one builder event. Returns the chunk it closed, if any. Pass
    /// markers carry no graph elements and are ignored.
    pub fn push(&mut self, event: GraphEvent) -> Option<Chunk> {
        match event {
            GraphEvent::NodeCreated(node) => self.current.nodes.push(node),
            GraphEvent::EdgeCreated(edge) => self.current.edges.push(edge),
            GraphEvent::PassComplete { .. } => return None,
        }

        let full = self.current.nodes.len() >= self.chunk_size
            || self.current.edges.len() >= self.chunk_size;
        full.then(|| self.rotate())
    }

    /// Close the trailing partial chunk.
    pub fn finish(mut self) -> Option<Chunk> {
        (!self.current.is_empty()).then(|| self.rotate())
    }

    fn rotate(&mut self) -> Chunk {
        let next = Chunk::new(self.current.index + 1);
        std::mem::replace(&mut self.current, next)
    }
}
