//! Lead source trait definitions

use crate::error::StoreResult;
use async_trait::async_trait;
use leadgraph_types::{LeadFilter, RawLeadRow};
use serde::{Deserialize, Serialize};

/// Opaque position in a store's stable ordering.
///
/// A page fetched `after` a cursor contains only rows strictly past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageCursor(pub u64);

/// One page of rows in stable-key order
#[derive(Debug, Clone, Default)]
pub struct LeadPage {
    pub rows: Vec<RawLeadRow>,
    /// Where the next page starts; `None` once the source is exhausted.
    pub next: Option<PageCursor>,
}

impl LeadPage {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Read-only, paginated lead source
#[async_trait]
pub trait LeadSource: Send + Sync {
    /// Fetch up to `limit` rows matching `filter`, strictly after `after`
    async fn fetch_page(
        &self,
        filter: &LeadFilter,
        after: Option<PageCursor>,
        limit: usize,
    ) -> StoreResult<LeadPage>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
