//! In-memory lead store

use super::traits::*;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use leadgraph_types::{LeadFilter, RawLeadRow};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory lead store for fixtures, tests and JSON snapshots
///
/// The cursor is the position just past the last scanned row, so rows appended
/// while a run is paging are picked up by later pages.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeadStore {
    rows: Arc<RwLock<Vec<RawLeadRow>>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<RawLeadRow>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(rows)),
        }
    }

    /// Load a JSON array of lead rows
    pub async fn from_json_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let rows: Vec<RawLeadRow> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidData(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), rows = rows.len(), "Loaded lead snapshot");
        Ok(Self::from_rows(rows))
    }

    pub async fn push(&self, row: RawLeadRow) {
        self.rows.write().await.push(row);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl LeadSource for InMemoryLeadStore {
    async fn fetch_page(
        &self,
        filter: &LeadFilter,
        after: Option<PageCursor>,
        limit: usize,
    ) -> StoreResult<LeadPage> {
        let rows = self.rows.read().await;
        let start = after.map(|c| c.0 as usize).unwrap_or(0).min(rows.len());

        let mut page = Vec::with_capacity(limit.min(rows.len() - start));
        let mut position = start;
        while position < rows.len() && page.len() < limit {
            let row = &rows[position];
            position += 1;
            if filter.matches(row) {
                page.push(row.clone());
            }
        }

        let next = (position < rows.len()).then_some(PageCursor(position as u64));
        Ok(LeadPage { rows: page, next })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
