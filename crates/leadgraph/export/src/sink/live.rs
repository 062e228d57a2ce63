//! Live streaming sink.
//!
//! Each chunk is one POST of newline-delimited JSON to the visualization
//! tool's graph-streaming endpoint, one message per node or edge.

use std::collections::BTreeMap;

use async_trait::async_trait;
use leadgraph_types::{AttrValue, GraphEdge, GraphNode};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Delivery, GraphSink, SinkKind};
use crate::chunk::Chunk;
use crate::config::LiveSinkConfig;
use crate::error::{SinkError, SinkResult};

/// One graph-streaming operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireMessage {
    AddNode {
        id: String,
        attributes: BTreeMap<String, AttrValue>,
    },
    /// Attribute update for a node the tool already knows. Accepted on the
    /// wire; the builder never re-emits a node, so the sink does not send it.
    ChangeNode {
        id: String,
        attributes: BTreeMap<String, AttrValue>,
    },
    AddEdge {
        id: String,
        source: String,
        target: String,
        directed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<u32>,
        attributes: BTreeMap<String, AttrValue>,
    },
}

impl WireMessage {
    pub fn add_node(node: &GraphNode) -> Self {
        Self::AddNode {
            id: node.node_id(),
            attributes: node_attributes(node),
        }
    }

    pub fn add_edge(edge: &GraphEdge) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "kind".to_string(),
            AttrValue::Text(edge.kind().as_str().to_string()),
        );
        Self::AddEdge {
            id: edge.edge_id(),
            source: edge.source_id(),
            target: edge.target_id(),
            directed: edge.directed(),
            weight: edge.weight(),
            attributes,
        }
    }
}

fn node_attributes(node: &GraphNode) -> BTreeMap<String, AttrValue> {
    let mut attributes: BTreeMap<String, AttrValue> = node
        .attributes()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    attributes.insert("label".to_string(), AttrValue::Text(node.label().to_string()));
    attributes
}

/// Pushes chunks over a pooled keep-alive HTTP client.
pub struct LiveSink {
    client: Client,
    endpoint: String,
    messages_sent: u64,
}

impl LiveSink {
    pub fn new(config: &LiveSinkConfig) -> SinkResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .pool_max_idle_per_host(config.pool_max_idle)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            messages_sent: 0,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Encode a chunk as NDJSON, nodes first.
    pub fn encode(chunk: &Chunk) -> SinkResult<Vec<u8>> {
        let mut body = Vec::with_capacity(chunk.len() * 128);
        for node in &chunk.nodes {
            serde_json::to_writer(&mut body, &WireMessage::add_node(node))?;
            body.push(b'\n');
        }
        for edge in &chunk.edges {
            serde_json::to_writer(&mut body, &WireMessage::add_edge(edge))?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl GraphSink for LiveSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Live
    }

    async fn send(&mut self, chunk: &Chunk) -> SinkResult<()> {
        let body = Self::encode(chunk)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        self.messages_sent += chunk.len() as u64;
        debug!(chunk_index = chunk.index, messages = chunk.len(), "Chunk streamed");
        Ok(())
    }

    async fn finish(&mut self) -> SinkResult<Delivery> {
        info!(endpoint = %self.endpoint, messages = self.messages_sent, "Live stream complete");
        Ok(Delivery::Stream {
            endpoint: self.endpoint.clone(),
            messages: self.messages_sent,
        })
    }

    async fn abort(&mut self, reason: &str) -> SinkResult<()> {
        // The tool keeps whatever it already received.
        info!(endpoint = %self.endpoint, messages = self.messages_sent, reason, "Live stream abandoned");
        Ok(())
    }
}
