//! Bipartite lead graph elements and builder events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::LeadId;
use crate::lead::LeadRecord;

/// Class tag carried by every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Target,
    Footprint,
}

impl NodeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Footprint => "footprint",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed attribute value attached to nodes and edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Double(f64),
    Text(String),
}

impl AttrValue {
    /// Type name used in exchange-format attribute declarations.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Text(_) => "string",
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// A lead as it appears in the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetNode {
    pub lead_id: LeadId,
    pub label: String,
    pub confidence: f64,
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub incident_category: String,
    pub verdict: String,
}

impl From<&LeadRecord> for TargetNode {
    fn from(lead: &LeadRecord) -> Self {
        Self {
            lead_id: lead.id.clone(),
            label: lead.name.clone(),
            confidence: lead.confidence,
            source: lead.source.clone(),
            first_seen: lead.first_seen,
            incident_category: lead.incident_category.clone(),
            verdict: lead.verdict.clone(),
        }
    }
}

/// A deduplicated artifact (address, alias, fingerprint).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FootprintNode {
    /// Normalized artifact value.
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum GraphNode {
    Target(TargetNode),
    Footprint(FootprintNode),
}

impl GraphNode {
    pub fn class(&self) -> NodeClass {
        match self {
            Self::Target(_) => NodeClass::Target,
            Self::Footprint(_) => NodeClass::Footprint,
        }
    }

    /// Graph-wide identifier; class-prefixed so the two classes never collide.
    pub fn node_id(&self) -> String {
        match self {
            Self::Target(t) => target_node_id(&t.lead_id),
            Self::Footprint(f) => footprint_node_id(&f.value),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Target(t) => &t.label,
            Self::Footprint(f) => &f.value,
        }
    }

    /// Attributes in a stable order, class tag first.
    pub fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        let class = ("class", AttrValue::Text(self.class().as_str().to_string()));
        match self {
            Self::Target(t) => vec![
                class,
                ("confidence", AttrValue::Double(t.confidence)),
                ("source", AttrValue::Text(t.source.clone())),
                ("first_seen", AttrValue::Text(t.first_seen.to_rfc3339())),
                ("incident_category", AttrValue::Text(t.incident_category.clone())),
                ("verdict", AttrValue::Text(t.verdict.clone())),
            ],
            Self::Footprint(f) => vec![class, ("value", AttrValue::Text(f.value.clone()))],
        }
    }
}

pub fn target_node_id(lead_id: &LeadId) -> String {
    format!("target:{}", lead_id)
}

pub fn footprint_node_id(value: &str) -> String {
    format!("footprint:{}", value)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Target -> Footprint.
    Owns,
    /// Target <-> Target, weighted by shared footprints.
    CoOccurs,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owns => "owns",
            Self::CoOccurs => "co_occurs",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphEdge {
    Ownership {
        target: LeadId,
        footprint: String,
    },
    CoOccurrence {
        a: LeadId,
        b: LeadId,
        weight: u32,
    },
}

impl GraphEdge {
    pub fn kind(&self) -> EdgeKind {
        match self {
            Self::Ownership { .. } => EdgeKind::Owns,
            Self::CoOccurrence { .. } => EdgeKind::CoOccurs,
        }
    }

    pub fn source_id(&self) -> String {
        match self {
            Self::Ownership { target, .. } => target_node_id(target),
            Self::CoOccurrence { a, .. } => target_node_id(a),
        }
    }

    pub fn target_id(&self) -> String {
        match self {
            Self::Ownership { footprint, .. } => footprint_node_id(footprint),
            Self::CoOccurrence { b, .. } => target_node_id(b),
        }
    }

    pub fn edge_id(&self) -> String {
        format!(
            "{}|{}|{}",
            self.kind().as_str(),
            self.source_id(),
            self.target_id()
        )
    }

    pub fn directed(&self) -> bool {
        matches!(self, Self::Ownership { .. })
    }

    pub fn weight(&self) -> Option<u32> {
        match self {
            Self::Ownership { .. } => None,
            Self::CoOccurrence { weight, .. } => Some(*weight),
        }
    }
}

/// The three builder passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPass {
    Targets,
    Footprints,
    CoOccurrence,
}

impl fmt::Display for BuildPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Targets => write!(f, "targets"),
            Self::Footprints => write!(f, "footprints"),
            Self::CoOccurrence => write!(f, "co-occurrence"),
        }
    }
}

/// One element of the builder's lazy output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    NodeCreated(GraphNode),
    EdgeCreated(GraphEdge),
    PassComplete { pass: BuildPass, emitted: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> GraphNode {
        GraphNode::Target(TargetNode {
            lead_id: LeadId::new(id),
            label: format!("Lead {}", id),
            confidence: 0.5,
            source: "osint".into(),
            first_seen: DateTime::<Utc>::UNIX_EPOCH,
            incident_category: "phishing".into(),
            verdict: "malicious".into(),
        })
    }

    #[test]
    fn node_ids_are_class_prefixed() {
        assert_eq!(target("x").node_id(), "target:x");
        let fp = GraphNode::Footprint(FootprintNode { value: "x".into() });
        assert_eq!(fp.node_id(), "footprint:x");
        assert_ne!(target("x").node_id(), fp.node_id());
    }

    #[test]
    fn target_attributes_lead_with_class() {
        let attrs = target("x").attributes();
        assert_eq!(attrs[0], ("class", AttrValue::Text("target".into())));
        assert!(attrs
            .iter()
            .any(|(k, v)| *k == "confidence" && v.type_name() == "double"));
    }

    #[test]
    fn edge_shape() {
        let own = GraphEdge::Ownership {
            target: LeadId::new("a"),
            footprint: "1.2.3.4".into(),
        };
        assert!(own.directed());
        assert_eq!(own.weight(), None);
        assert_eq!(own.target_id(), "footprint:1.2.3.4");

        let co = GraphEdge::CoOccurrence {
            a: LeadId::new("a"),
            b: LeadId::new("b"),
            weight: 3,
        };
        assert!(!co.directed());
        assert_eq!(co.weight(), Some(3));
        assert_eq!(co.edge_id(), "co_occurs|target:a|target:b");
    }

    #[test]
    fn event_serializes_with_tag() {
        let ev = GraphEvent::PassComplete {
            pass: BuildPass::Footprints,
            emitted: 4,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "pass_complete");
        assert_eq!(json["pass"], "footprints");
    }
}
