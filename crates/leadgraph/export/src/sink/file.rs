//! GEXF 1.3 file sink.
//!
//! GEXF wants every `<node>` before the first `<edge>`, but chunks interleave
//! them. Nodes go straight into the document; edges are spooled to a sibling
//! file and appended on `finish`. The document is written at
//! `<destination>.partial` and only renamed into place once complete.
//!
//! Markup is produced with `quick_xml::Writer`, one element per line. Each
//! fragment (header, chunk, trailer) is rendered into memory and then
//! appended, so the document is only ever extended.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use leadgraph_types::{GraphEdge, GraphNode, RunId};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::{Delivery, GraphSink, SinkKind};
use crate::chunk::Chunk;
use crate::error::{SinkError, SinkResult};

const GEXF_NAMESPACE: &str = "http://gexf.net/1.3";

/// Node attributes declared in the document header, with their GEXF types.
const NODE_ATTRIBUTES: [(&str, &str); 7] = [
    ("class", "string"),
    ("confidence", "double"),
    ("source", "string"),
    ("first_seen", "string"),
    ("incident_category", "string"),
    ("verdict", "string"),
    ("value", "string"),
];

const EDGE_ATTRIBUTES: [(&str, &str); 1] = [("kind", "string")];

struct OpenFiles {
    doc: BufWriter<File>,
    spool: BufWriter<File>,
}

pub struct GexfFileSink {
    destination: PathBuf,
    partial_path: PathBuf,
    spool_path: PathBuf,
    files: Option<OpenFiles>,
    nodes_written: u64,
    edges_spooled: u64,
}

impl GexfFileSink {
    /// Open the partial document and edge spool, and write the header.
    pub async fn create(destination: impl Into<PathBuf>, run_id: RunId) -> SinkResult<Self> {
        let destination = destination.into();
        let partial_path = with_suffix(&destination, ".partial");
        let spool_path = with_suffix(&destination, ".edges.spool");

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let header = header(run_id)?;
        let mut doc = BufWriter::new(File::create(&partial_path).await?);
        let spool = BufWriter::new(File::create(&spool_path).await?);
        doc.write_all(&header).await?;

        debug!(path = %partial_path.display(), "Opened GEXF document");
        Ok(Self {
            destination,
            partial_path,
            spool_path,
            files: Some(OpenFiles { doc, spool }),
            nodes_written: 0,
            edges_spooled: 0,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    async fn discard_spool(&self) {
        if let Err(e) = fs::remove_file(&self.spool_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.spool_path.display(), error = %e, "Could not remove edge spool");
            }
        }
    }
}

#[async_trait]
impl GraphSink for GexfFileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn send(&mut self, chunk: &Chunk) -> SinkResult<()> {
        let files = self.files.as_mut().ok_or(SinkError::Closed)?;

        let mut nodes = Fragment::new();
        for node in &chunk.nodes {
            nodes.node(node)?;
        }
        let mut edges = Fragment::new();
        for edge in &chunk.edges {
            edges.edge(edge)?;
        }

        files.doc.write_all(&nodes.into_bytes()).await?;
        files.spool.write_all(&edges.into_bytes()).await?;

        self.nodes_written += chunk.nodes.len() as u64;
        self.edges_spooled += chunk.edges.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> SinkResult<Delivery> {
        let files = self.files.as_mut().ok_or(SinkError::Closed)?;

        let mut between = Fragment::new();
        between.line(Event::End(BytesEnd::new("nodes")))?;
        between.line(Event::Start(BytesStart::new("edges")))?;
        let mut trailer = Fragment::new();
        trailer.line(Event::End(BytesEnd::new("edges")))?;
        trailer.line(Event::End(BytesEnd::new("graph")))?;
        trailer.line(Event::End(BytesEnd::new("gexf")))?;

        files.spool.flush().await?;
        files.doc.write_all(&between.into_bytes()).await?;
        let mut spool = File::open(&self.spool_path).await?;
        tokio::io::copy(&mut spool, &mut files.doc).await?;
        files.doc.write_all(&trailer.into_bytes()).await?;
        files.doc.flush().await?;
        files.doc.get_ref().sync_all().await?;

        // Until the rename lands the handles stay open, so `abort` can still
        // mark the partial document.
        fs::rename(&self.partial_path, &self.destination).await?;
        self.files = None;
        self.discard_spool().await;

        info!(
            path = %self.destination.display(),
            nodes = self.nodes_written,
            edges = self.edges_spooled,
            "GEXF export written"
        );
        Ok(Delivery::File {
            path: self.destination.clone(),
        })
    }

    async fn abort(&mut self, reason: &str) -> SinkResult<()> {
        let Some(mut files) = self.files.take() else {
            return Ok(());
        };
        drop(files.spool);

        let note = format!(
            " leadgraph: export incomplete ({} nodes, {} edges received): {} ",
            self.nodes_written,
            self.edges_spooled,
            comment_safe(reason)
        );
        let mut marker = Fragment::new();
        marker.line(Event::Comment(BytesText::from_escaped(note)))?;
        files.doc.write_all(&marker.into_bytes()).await?;
        files.doc.flush().await?;

        self.discard_spool().await;
        warn!(path = %self.partial_path.display(), reason, "GEXF export left incomplete");
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// An in-memory run of GEXF markup.
struct Fragment {
    xml: Writer<Vec<u8>>,
}

impl Fragment {
    fn new() -> Self {
        Self {
            xml: Writer::new(Vec::new()),
        }
    }

    fn line(&mut self, event: Event<'_>) -> SinkResult<()> {
        self.xml.write_event(event)?;
        self.xml.get_mut().push(b'\n');
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> SinkResult<()> {
        self.xml.write_event(Event::Start(BytesStart::new(name)))?;
        self.xml.write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
        self.line(Event::End(BytesEnd::new(name)))
    }

    fn declarations(&mut self, class: &str, attributes: &[(&str, &str)]) -> SinkResult<()> {
        self.line(Event::Start(
            BytesStart::new("attributes").with_attributes([("class", class)]),
        ))?;
        for (id, kind) in attributes {
            self.line(Event::Empty(BytesStart::new("attribute").with_attributes([
                ("id", *id),
                ("title", *id),
                ("type", *kind),
            ])))?;
        }
        self.line(Event::End(BytesEnd::new("attributes")))
    }

    fn node(&mut self, node: &GraphNode) -> SinkResult<()> {
        let id = node.node_id();
        self.line(Event::Start(BytesStart::new("node").with_attributes([
            ("id", &*xml_safe(&id)),
            ("label", &*xml_safe(node.label())),
        ])))?;
        self.line(Event::Start(BytesStart::new("attvalues")))?;
        for (name, value) in node.attributes() {
            let value = value.to_string();
            self.line(Event::Empty(BytesStart::new("attvalue").with_attributes([
                ("for", name),
                ("value", &*xml_safe(&value)),
            ])))?;
        }
        self.line(Event::End(BytesEnd::new("attvalues")))?;
        self.line(Event::End(BytesEnd::new("node")))
    }

    fn edge(&mut self, edge: &GraphEdge) -> SinkResult<()> {
        let (id, source, target) = (edge.edge_id(), edge.source_id(), edge.target_id());
        let (id, source, target) = (xml_safe(&id), xml_safe(&source), xml_safe(&target));
        let kind = if edge.directed() { "directed" } else { "undirected" };
        let weight = edge.weight().map(|w| w.to_string());

        let mut start = BytesStart::new("edge").with_attributes([
            ("id", &*id),
            ("source", &*source),
            ("target", &*target),
            ("type", kind),
        ]);
        if let Some(weight) = &weight {
            start.push_attribute(("weight", weight.as_str()));
        }

        self.line(Event::Start(start))?;
        self.line(Event::Start(BytesStart::new("attvalues")))?;
        self.line(Event::Empty(BytesStart::new("attvalue").with_attributes([
            ("for", "kind"),
            ("value", edge.kind().as_str()),
        ])))?;
        self.line(Event::End(BytesEnd::new("attvalues")))?;
        self.line(Event::End(BytesEnd::new("edge")))
    }

    fn into_bytes(self) -> Vec<u8> {
        self.xml.into_inner()
    }
}

fn header(run_id: RunId) -> SinkResult<Vec<u8>> {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let mut out = Fragment::new();

    out.line(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    out.line(Event::Start(
        BytesStart::new("gexf").with_attributes([("xmlns", GEXF_NAMESPACE), ("version", "1.3")]),
    ))?;
    out.line(Event::Start(
        BytesStart::new("meta").with_attributes([("lastmodifieddate", date.as_str())]),
    ))?;
    out.text_element("creator", "leadgraph")?;
    out.text_element("description", &run_id.to_string())?;
    out.line(Event::End(BytesEnd::new("meta")))?;
    out.line(Event::Start(BytesStart::new("graph").with_attributes([
        ("mode", "static"),
        ("defaultedgetype", "undirected"),
    ])))?;
    out.declarations("node", &NODE_ATTRIBUTES)?;
    out.declarations("edge", &EDGE_ATTRIBUTES)?;
    out.line(Event::Start(BytesStart::new("nodes")))?;
    Ok(out.into_bytes())
}

/// Drop characters XML 1.0 does not allow anywhere in a document. The writer
/// escapes markup characters but passes these through.
fn xml_safe(raw: &str) -> Cow<'_, str> {
    if raw.chars().any(is_forbidden) {
        Cow::Owned(raw.chars().filter(|c| !is_forbidden(*c)).collect())
    } else {
        Cow::Borrowed(raw)
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}

/// Comment text is written unescaped, and `--` may not appear inside it.
fn comment_safe(reason: &str) -> String {
    let mut text = xml_safe(reason).into_owned();
    while text.contains("--") {
        text = text.replace("--", "- -");
    }
    text
}
