use serde::{Deserialize, Serialize};

/// Counters accumulated while a build runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub pages_fetched: u64,
    pub rows_read: u64,
    pub malformed_skipped: u64,
    pub duplicate_leads_merged: u64,
    pub targets: u64,
    pub footprints: u64,
    pub ownership_edges: u64,
    pub co_occurrence_edges: u64,
}

impl BuildStats {
    pub fn nodes(&self) -> u64 {
        self.targets + self.footprints
    }

    pub fn edges(&self) -> u64 {
        self.ownership_edges + self.co_occurrence_edges
    }
}
