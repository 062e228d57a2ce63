//! Lead store configuration

use crate::error::StoreResult;
use crate::memory::InMemoryLeadStore;
use crate::sqlite::SqliteLeadStore;
use crate::traits::LeadSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Where leads are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// SQLite lead database
    Sqlite {
        /// Connection URL, e.g. `sqlite://leads.db?mode=ro`
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },

    /// JSON snapshot (array of lead rows) loaded into memory
    Json { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            url: "sqlite://leads.db?mode=ro".to_string(),
            max_connections: default_pool_size(),
            connect_timeout_secs: default_connection_timeout(),
        }
    }
}

fn default_pool_size() -> u32 {
    4
}

fn default_connection_timeout() -> u64 {
    5
}

/// Open the configured backend
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn LeadSource>> {
    match config {
        StoreConfig::Sqlite {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store =
                SqliteLeadStore::connect(url, *max_connections, *connect_timeout_secs).await?;
            Ok(Arc::new(store))
        }
        StoreConfig::Json { path } => Ok(Arc::new(InMemoryLeadStore::from_json_file(path).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_read_only_sqlite() {
        match StoreConfig::default() {
            StoreConfig::Sqlite { url, max_connections, .. } => {
                assert!(url.contains("mode=ro"));
                assert_eq!(max_connections, 4);
            }
            other => panic!("unexpected default {:?}", other),
        }
    }

    #[test]
    fn deserializes_tagged_variant() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"type":"json","path":"/tmp/leads.json"}"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::Json {
                path: PathBuf::from("/tmp/leads.json")
            }
        );
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_io_error() {
        let config = StoreConfig::Json {
            path: PathBuf::from("/nonexistent/leads.json"),
        };
        assert!(open_store(&config).await.is_err());
    }
}
