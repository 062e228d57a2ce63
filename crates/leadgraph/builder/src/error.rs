use leadgraph_store::StoreError;

/// Errors that end a graph build.
///
/// Malformed rows are not errors: they are skipped and counted in
/// [`BuildStats`](crate::BuildStats).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("lead store unavailable after {pages_fetched} page(s): {source}")]
    DataSourceUnavailable {
        pages_fetched: u64,
        #[source]
        source: StoreError,
    },
    #[error("graph build cancelled")]
    Cancelled,
}

pub type BuildResult<T> = Result<T, BuildError>;
