use std::collections::{btree_map, BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use leadgraph_store::{LeadSource, PageCursor};
use leadgraph_types::{
    normalize_artifact, BuildPass, FootprintNode, GraphEdge, GraphEvent, GraphNode, LeadFilter,
    LeadId, LeadRecord, RawLeadRow, TargetNode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BuilderConfig;
use crate::error::{BuildError, BuildResult};
use crate::stats::BuildStats;

/// Entry point for graph construction.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: BuilderConfig,
}

impl GraphBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    /// Start a build over `source`. Nothing is read until the first
    /// [`GraphEvents::next`] call.
    pub fn build(
        &self,
        source: Arc<dyn LeadSource>,
        filter: LeadFilter,
        cancel: CancellationToken,
    ) -> GraphEvents {
        GraphEvents {
            source,
            filter,
            page_size: self.config.effective_page_size(),
            cancel,
            phase: Phase::Targets {
                after: None,
                exhausted: false,
            },
            pending: VecDeque::new(),
            lead_ids: Vec::new(),
            lead_artifacts: Vec::new(),
            lead_index: HashMap::new(),
            footprint_index: HashMap::new(),
            footprint_owners: Vec::new(),
            stats: BuildStats::default(),
        }
    }
}

enum Phase {
    Targets {
        after: Option<PageCursor>,
        exhausted: bool,
    },
    Footprints {
        cursor: usize,
    },
    CoOccurrence {
        pairs: btree_map::IntoIter<(usize, usize), u32>,
    },
    Done,
}

/// Lazy, single-use sequence of graph events.
///
/// Every edge is yielded after the node events of both its endpoints. After
/// an error or the final `PassComplete`, `next` returns `None`.
pub struct GraphEvents {
    source: Arc<dyn LeadSource>,
    filter: LeadFilter,
    page_size: usize,
    cancel: CancellationToken,
    phase: Phase,
    pending: VecDeque<GraphEvent>,
    /// Lead index -> id, in first-read order.
    lead_ids: Vec<LeadId>,
    /// Lead index -> raw artifacts; emptied as pass 2 consumes them.
    lead_artifacts: Vec<Vec<String>>,
    /// Only populated during pass 1.
    lead_index: HashMap<LeadId, usize>,
    /// Normalized value -> footprint index.
    footprint_index: HashMap<String, usize>,
    /// Footprint index -> owning lead indices, ascending.
    footprint_owners: Vec<Vec<usize>>,
    stats: BuildStats,
}

impl GraphEvents {
    /// Counters so far; final once `next` has returned `None`.
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done) && self.pending.is_empty()
    }

    pub async fn next(&mut self) -> Option<BuildResult<GraphEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,

                Phase::Targets {
                    exhausted: true, ..
                } => {
                    if self.cancel.is_cancelled() {
                        return Some(Err(BuildError::Cancelled));
                    }
                    self.finish_pass(BuildPass::Targets, self.stats.targets);
                    self.lead_index = HashMap::new();
                    self.phase = Phase::Footprints { cursor: 0 };
                }

                Phase::Targets { after, .. } => {
                    if self.cancel.is_cancelled() {
                        debug!(pages = self.stats.pages_fetched, "Build cancelled during pagination");
                        return Some(Err(BuildError::Cancelled));
                    }
                    let page = match self
                        .source
                        .fetch_page(&self.filter, after, self.page_size)
                        .await
                    {
                        Ok(page) => page,
                        Err(source) => {
                            warn!(
                                backend = self.source.backend(),
                                pages = self.stats.pages_fetched,
                                error = %source,
                                "Lead page fetch failed"
                            );
                            return Some(Err(BuildError::DataSourceUnavailable {
                                pages_fetched: self.stats.pages_fetched,
                                source,
                            }));
                        }
                    };
                    self.stats.pages_fetched += 1;
                    let next = page.next;
                    for row in page.rows {
                        self.ingest_row(row);
                    }
                    self.phase = Phase::Targets {
                        after: next,
                        exhausted: next.is_none(),
                    };
                }

                Phase::Footprints { cursor } if cursor < self.lead_ids.len() => {
                    self.link_footprints(cursor);
                    self.phase = Phase::Footprints { cursor: cursor + 1 };
                }

                Phase::Footprints { .. } => {
                    if self.cancel.is_cancelled() {
                        return Some(Err(BuildError::Cancelled));
                    }
                    self.finish_pass(
                        BuildPass::Footprints,
                        self.stats.footprints + self.stats.ownership_edges,
                    );
                    let pairs = self.count_pairs();
                    self.phase = Phase::CoOccurrence {
                        pairs: pairs.into_iter(),
                    };
                }

                Phase::CoOccurrence { mut pairs } => match pairs.next() {
                    Some(((a, b), weight)) => {
                        self.pending
                            .push_back(GraphEvent::EdgeCreated(GraphEdge::CoOccurrence {
                                a: self.lead_ids[a].clone(),
                                b: self.lead_ids[b].clone(),
                                weight,
                            }));
                        self.stats.co_occurrence_edges += 1;
                        self.phase = Phase::CoOccurrence { pairs };
                    }
                    None => {
                        self.finish_pass(BuildPass::CoOccurrence, self.stats.co_occurrence_edges);
                        info!(
                            targets = self.stats.targets,
                            footprints = self.stats.footprints,
                            edges = self.stats.edges(),
                            malformed = self.stats.malformed_skipped,
                            "Graph build complete"
                        );
                    }
                },
            }
        }
    }

    fn finish_pass(&mut self, pass: BuildPass, emitted: u64) {
        debug!(pass = %pass, emitted, "Build pass complete");
        self.pending
            .push_back(GraphEvent::PassComplete { pass, emitted });
    }

    /// Pass 1: validate one row and emit its target node.
    fn ingest_row(&mut self, row: RawLeadRow) {
        self.stats.rows_read += 1;
        let raw_id = row.id.clone();

        let lead = match LeadRecord::try_from(row) {
            Ok(lead) => lead,
            Err(e) => {
                warn!(
                    lead_id = raw_id.as_deref().unwrap_or("<missing>"),
                    error = %e,
                    "Skipping malformed lead record"
                );
                self.stats.malformed_skipped += 1;
                return;
            }
        };

        if let Some(&index) = self.lead_index.get(&lead.id) {
            debug!(lead_id = %lead.id, "Merging artifacts of duplicate lead id");
            self.stats.duplicate_leads_merged += 1;
            self.lead_artifacts[index].extend(lead.artifacts);
            return;
        }

        let index = self.lead_ids.len();
        self.lead_index.insert(lead.id.clone(), index);
        self.lead_ids.push(lead.id.clone());
        self.pending
            .push_back(GraphEvent::NodeCreated(GraphNode::Target(TargetNode::from(
                &lead,
            ))));
        self.lead_artifacts.push(lead.artifacts);
        self.stats.targets += 1;
    }

    /// Pass 2: footprint nodes on first sight, ownership edges per pair.
    fn link_footprints(&mut self, cursor: usize) {
        let artifacts = std::mem::take(&mut self.lead_artifacts[cursor]);
        let owner = cursor;

        for raw in &artifacts {
            let Some(value) = normalize_artifact(raw) else {
                continue;
            };

            let footprint = match self.footprint_index.get(&value) {
                Some(&index) => index,
                None => {
                    let index = self.footprint_owners.len();
                    self.footprint_index.insert(value.clone(), index);
                    self.footprint_owners.push(Vec::new());
                    self.pending
                        .push_back(GraphEvent::NodeCreated(GraphNode::Footprint(
                            FootprintNode {
                                value: value.clone(),
                            },
                        )));
                    self.stats.footprints += 1;
                    index
                }
            };

            // Leads are visited in index order, so a repeat within one lead
            // is always the last owner recorded.
            let owners = &mut self.footprint_owners[footprint];
            if owners.last() == Some(&owner) {
                continue;
            }
            owners.push(owner);

            self.pending
                .push_back(GraphEvent::EdgeCreated(GraphEdge::Ownership {
                    target: self.lead_ids[cursor].clone(),
                    footprint: value,
                }));
            self.stats.ownership_edges += 1;
        }
    }

    /// Pass 3: shared-footprint counts per unordered target pair.
    fn count_pairs(&mut self) -> BTreeMap<(usize, usize), u32> {
        let mut weights = BTreeMap::new();
        for owners in self.footprint_owners.drain(..) {
            if owners.len() < 2 {
                continue;
            }
            for (i, &a) in owners.iter().enumerate() {
                for &b in &owners[i + 1..] {
                    let weight = weights.entry((a, b)).or_insert(0u32);
                    *weight = weight.saturating_add(1);
                }
            }
        }
        self.footprint_index = HashMap::new();
        self.lead_artifacts = Vec::new();
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use leadgraph_store::{InMemoryLeadStore, LeadPage, StoreError, StoreResult};
    use leadgraph_types::{EdgeKind, NodeClass};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn lead(id: &str, artifacts: &[&str]) -> RawLeadRow {
        RawLeadRow {
            id: Some(id.into()),
            name: Some(format!("Lead {}", id)),
            confidence: Some(0.7),
            first_seen: Some("2024-02-02T12:00:00Z".into()),
            artifacts: Some(json!(artifacts)),
            ..Default::default()
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Drained {
        targets: Vec<String>,
        footprints: Vec<String>,
        ownership: Vec<(String, String)>,
        co_occurrence: Vec<(String, String, u32)>,
        passes: Vec<BuildPass>,
    }

    async fn drain(mut events: GraphEvents) -> (Drained, BuildStats) {
        let mut out = Drained::default();
        while let Some(event) = events.next().await {
            match event.unwrap() {
                GraphEvent::NodeCreated(node) => match node.class() {
                    NodeClass::Target => out.targets.push(node.node_id()),
                    NodeClass::Footprint => out.footprints.push(node.node_id()),
                },
                GraphEvent::EdgeCreated(edge) => match edge.kind() {
                    EdgeKind::Owns => out.ownership.push((edge.source_id(), edge.target_id())),
                    EdgeKind::CoOccurs => out.co_occurrence.push((
                        edge.source_id(),
                        edge.target_id(),
                        edge.weight().unwrap_or(0),
                    )),
                },
                GraphEvent::PassComplete { pass, .. } => out.passes.push(pass),
            }
        }
        assert!(events.is_finished());
        (out, events.stats().clone())
    }

    async fn build_rows(rows: Vec<RawLeadRow>, page_size: usize) -> (Drained, BuildStats) {
        let builder = GraphBuilder::new(BuilderConfig { page_size });
        let events = builder.build(
            Arc::new(InMemoryLeadStore::from_rows(rows)),
            LeadFilter::default(),
            CancellationToken::new(),
        );
        drain(events).await
    }

    struct FailingSource {
        fail_after: usize,
        inner: InMemoryLeadStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LeadSource for FailingSource {
        async fn fetch_page(
            &self,
            filter: &LeadFilter,
            after: Option<PageCursor>,
            limit: usize,
        ) -> StoreResult<LeadPage> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(StoreError::Connection("database is locked".into()));
            }
            self.inner.fetch_page(filter, after, limit).await
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    // ---------------------------------------------------------------------
    // Scenarios
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn three_lead_scenario() {
        let (g, stats) = build_rows(
            vec![
                lead("A", &["ip1", "ip2"]),
                lead("B", &["ip2", "ip3"]),
                lead("C", &["ip4"]),
            ],
            1000,
        )
        .await;

        assert_eq!(g.targets.len(), 3);
        assert_eq!(g.footprints.len(), 4);
        assert_eq!(g.ownership.len(), 5);
        assert_eq!(
            g.co_occurrence,
            vec![("target:A".to_string(), "target:B".to_string(), 1)]
        );
        assert!(!g
            .co_occurrence
            .iter()
            .any(|(a, b, _)| a == "target:C" || b == "target:C"));
        assert_eq!(
            g.passes,
            vec![BuildPass::Targets, BuildPass::Footprints, BuildPass::CoOccurrence]
        );
        assert_eq!(stats.nodes(), 7);
        assert_eq!(stats.edges(), 6);
    }

    #[tokio::test]
    async fn weight_counts_distinct_shared_footprints() {
        let (g, _) = build_rows(
            vec![
                lead("one", &["x"]),
                lead("one-b", &["x"]),
                lead("three", &["a", "b", "c", "d"]),
                lead("three-b", &["a", "B ", " c"]),
                lead("none", &["z"]),
            ],
            2,
        )
        .await;

        assert!(g
            .co_occurrence
            .contains(&("target:one".into(), "target:one-b".into(), 1)));
        assert!(g
            .co_occurrence
            .contains(&("target:three".into(), "target:three-b".into(), 3)));
        assert_eq!(g.co_occurrence.len(), 2);
    }

    #[tokio::test]
    async fn footprints_dedupe_on_case_and_whitespace() {
        let (g, _) = build_rows(
            vec![lead("a", &["1.2.3.4"]), lead("b", &[" 1.2.3.4 ", "EVIL.example"])],
            1000,
        )
        .await;

        assert_eq!(g.footprints, vec!["footprint:1.2.3.4", "footprint:evil.example"]);
        assert_eq!(g.ownership.len(), 3);
    }

    #[tokio::test]
    async fn repeated_artifact_within_a_lead_yields_one_edge() {
        let (g, _) = build_rows(vec![lead("a", &["x", " X", "x"]), lead("b", &["x"])], 1000).await;
        assert_eq!(g.ownership.len(), 2);
        assert_eq!(g.co_occurrence, vec![("target:a".into(), "target:b".into(), 1)]);
    }

    #[tokio::test]
    async fn lead_without_artifacts_is_isolated() {
        let mut bare = lead("bare", &[]);
        bare.artifacts = None;
        let (g, _) = build_rows(vec![bare, lead("b", &["", "  "])], 1000).await;
        assert_eq!(g.targets.len(), 2);
        assert!(g.footprints.is_empty());
        assert!(g.ownership.is_empty());
        assert!(g.co_occurrence.is_empty());
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_and_counted() {
        let mut no_name = lead("x", &["ip"]);
        no_name.name = None;
        let mut bad_conf = lead("y", &["ip"]);
        bad_conf.confidence = Some(-0.1);

        let (g, stats) = build_rows(vec![no_name, lead("ok", &["ip"]), bad_conf], 1000).await;
        assert_eq!(g.targets, vec!["target:ok"]);
        assert_eq!(stats.malformed_skipped, 2);
        assert_eq!(stats.rows_read, 3);
    }

    #[tokio::test]
    async fn pair_counting_keeps_wide_lead_indices() {
        let far = u32::MAX as usize + 7;
        let mut events = GraphBuilder::new(BuilderConfig::default()).build(
            Arc::new(InMemoryLeadStore::from_rows(vec![])),
            LeadFilter::default(),
            CancellationToken::new(),
        );
        events.footprint_owners = vec![vec![3, far], vec![3, far], vec![far]];

        let weights = events.count_pairs();
        assert_eq!(weights.into_iter().collect::<Vec<_>>(), vec![((3, far), 2)]);
    }

    #[tokio::test]
    async fn duplicate_lead_ids_merge_artifacts() {
        let (g, stats) = build_rows(
            vec![lead("a", &["x"]), lead("b", &["y"]), lead("a", &["y"])],
            1,
        )
        .await;
        assert_eq!(g.targets.len(), 2);
        assert_eq!(stats.duplicate_leads_merged, 1);
        assert_eq!(g.co_occurrence, vec![("target:a".into(), "target:b".into(), 1)]);
    }

    #[tokio::test]
    async fn edges_follow_their_endpoints() {
        let builder = GraphBuilder::new(BuilderConfig { page_size: 1 });
        let mut events = builder.build(
            Arc::new(InMemoryLeadStore::from_rows(vec![
                lead("a", &["x", "y"]),
                lead("b", &["y"]),
            ])),
            LeadFilter::default(),
            CancellationToken::new(),
        );

        let mut seen = HashSet::new();
        while let Some(event) = events.next().await {
            match event.unwrap() {
                GraphEvent::NodeCreated(node) => {
                    assert!(seen.insert(node.node_id()), "node emitted twice");
                }
                GraphEvent::EdgeCreated(edge) => {
                    assert!(seen.contains(&edge.source_id()));
                    assert!(seen.contains(&edge.target_id()));
                }
                GraphEvent::PassComplete { .. } => {}
            }
        }
    }

    #[tokio::test]
    async fn page_size_drives_fetch_count() {
        let rows = (0..5).map(|i| lead(&format!("l{}", i), &[])).collect();
        let (_, stats) = build_rows(rows, 2).await;
        assert_eq!(stats.pages_fetched, 3);
        assert_eq!(stats.targets, 5);
    }

    #[tokio::test]
    async fn store_failure_aborts_the_build() {
        let source = FailingSource {
            fail_after: 1,
            inner: InMemoryLeadStore::from_rows((0..4).map(|i| lead(&i.to_string(), &[])).collect()),
            calls: AtomicUsize::new(0),
        };
        let mut events = GraphBuilder::new(BuilderConfig { page_size: 2 }).build(
            Arc::new(source),
            LeadFilter::default(),
            CancellationToken::new(),
        );

        let mut targets = 0;
        let err = loop {
            match events.next().await {
                Some(Ok(GraphEvent::NodeCreated(_))) => targets += 1,
                Some(Ok(_)) => {}
                Some(Err(e)) => break e,
                None => panic!("build should have failed"),
            }
        };
        assert_eq!(targets, 2);
        assert!(matches!(
            err,
            BuildError::DataSourceUnavailable { pages_fetched: 1, .. }
        ));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_pagination() {
        let source = Arc::new(FailingSource {
            fail_after: usize::MAX,
            inner: InMemoryLeadStore::from_rows((0..10).map(|i| lead(&i.to_string(), &[])).collect()),
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let mut events = GraphBuilder::new(BuilderConfig { page_size: 2 }).build(
            source.clone(),
            LeadFilter::default(),
            cancel.clone(),
        );

        assert!(matches!(events.next().await, Some(Ok(_))));
        cancel.cancel();
        let mut result = None;
        while let Some(event) = events.next().await {
            if let Err(e) = event {
                result = Some(e);
            }
        }
        assert!(matches!(result, Some(BuildError::Cancelled)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    // ---------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------

    fn arb_artifact() -> impl Strategy<Value = String> {
        (0usize..8, any::<bool>(), any::<bool>()).prop_map(|(n, upper, pad)| {
            let base = format!("host-{}.example", n);
            let cased = if upper { base.to_uppercase() } else { base };
            if pad {
                format!("  {} ", cased)
            } else {
                cased
            }
        })
    }

    fn arb_leads() -> impl Strategy<Value = Vec<(u8, Vec<String>)>> {
        proptest::collection::vec(
            (0u8..12, proptest::collection::vec(arb_artifact(), 0..5)),
            0..20,
        )
    }

    fn rows_from(leads: &[(u8, Vec<String>)]) -> Vec<RawLeadRow> {
        leads
            .iter()
            .map(|(id, artifacts)| {
                let refs: Vec<&str> = artifacts.iter().map(String::as_str).collect();
                lead(&format!("L{}", id), &refs)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn target_count_equals_distinct_lead_ids(leads in arb_leads(), page in 1usize..6) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (g, _) = rt.block_on(build_rows(rows_from(&leads), page));
            let distinct: HashSet<u8> = leads.iter().map(|(id, _)| *id).collect();
            prop_assert_eq!(g.targets.len(), distinct.len());
        }

        #[test]
        fn rebuild_is_isomorphic(leads in arb_leads()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (first, s1) = rt.block_on(build_rows(rows_from(&leads), 3));
            let (second, s2) = rt.block_on(build_rows(rows_from(&leads), 7));
            prop_assert_eq!(first, second);
            prop_assert_eq!(s1.edges(), s2.edges());
        }

        #[test]
        fn weights_match_shared_footprint_counts(leads in arb_leads()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (g, _) = rt.block_on(build_rows(rows_from(&leads), 4));

            let mut owned: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for (id, artifacts) in &leads {
                let set = owned.entry(format!("target:L{}", id)).or_default();
                set.extend(artifacts.iter().filter_map(|a| normalize_artifact(a)));
            }

            for (a, b, weight) in &g.co_occurrence {
                let shared = owned[a].intersection(&owned[b]).count() as u32;
                prop_assert!(*weight >= 1);
                prop_assert_eq!(*weight, shared);
            }

            let sets: Vec<&BTreeSet<String>> = owned.values().collect();
            let mut expected_pairs = 0;
            for (i, fa) in sets.iter().enumerate() {
                for fb in &sets[i + 1..] {
                    if !fa.is_disjoint(fb) {
                        expected_pairs += 1;
                    }
                }
            }
            prop_assert_eq!(g.co_occurrence.len(), expected_pairs);
        }
    }
}
