//! Error types for leadgraph-store

use thiserror::Error;

/// Lead store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach or open the store
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query failed while paging
    #[error("Query error: {0}")]
    Query(String),

    /// Snapshot or column data could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
