#![deny(unsafe_code)]
//! # leadgraph-store
//!
//! Read-only, keyset-paginated access to the lead store.
//!
//! The export pipeline only ever reads leads, one bounded page at a time,
//! ordered by a stable insertion key. Two backends implement [`LeadSource`]:
//!
//! - [`SqliteLeadStore`]: the production lead database (via `sqlx`)
//! - [`InMemoryLeadStore`]: fixtures, tests and offline JSON snapshots
//!
//! Pagination is eventually consistent: a lead inserted while a run is paging
//! may or may not be observed by that run.

mod config;
mod error;
mod memory;
mod sqlite;
mod traits;

pub use config::{open_store, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLeadStore;
pub use sqlite::SqliteLeadStore;
pub use traits::{LeadPage, LeadSource, PageCursor};
