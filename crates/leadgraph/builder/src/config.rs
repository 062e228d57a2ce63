use serde::{Deserialize, Serialize};

/// Graph builder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Rows requested per page from the lead store.
    pub page_size: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self { page_size: 1000 }
    }
}

impl BuilderConfig {
    /// Page size actually used; a zero page size would never make progress.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}
