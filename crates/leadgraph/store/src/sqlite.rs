//! SQLite lead store implementation

use super::traits::*;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use leadgraph_types::{
    LeadFilter, RawLeadRow, DEFAULT_INCIDENT_CATEGORY, DEFAULT_SOURCE, DEFAULT_VERDICT,
};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::time::Duration;

/// SQLite does not enforce declared column types. Values of the wrong storage
/// class are read as NULL, so a bad cell fails validation of its row and not
/// the whole page.
const SELECT_COLUMNS: &str = concat!(
    "SELECT rowid AS seq, ",
    "CASE WHEN typeof(id) IN ('text', 'integer') THEN CAST(id AS TEXT) END AS id, ",
    "CASE WHEN typeof(name) = 'text' THEN name END AS name, ",
    "CASE WHEN typeof(confidence) IN ('real', 'integer') ",
    "THEN CAST(confidence AS REAL) END AS confidence, ",
    "CASE WHEN typeof(source) = 'text' THEN source END AS source, ",
    "CASE WHEN typeof(incident_category) = 'text' THEN incident_category END AS incident_category, ",
    "CASE WHEN typeof(first_seen) = 'text' THEN first_seen END AS first_seen, ",
    "CASE WHEN typeof(verdict) = 'text' THEN verdict END AS verdict, ",
    "CASE WHEN typeof(artifacts) = 'text' THEN artifacts END AS artifacts ",
    "FROM leads WHERE rowid > ",
);

/// SQLite-backed lead store
///
/// Pages are keyed on `rowid`, i.e. insertion order.
#[derive(Debug, Clone)]
pub struct SqliteLeadStore {
    pool: SqlitePool,
}

impl SqliteLeadStore {
    /// Open a connection pool to the lead database
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!(url = %url, "Connected to lead store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `leads` table if it does not exist
    ///
    /// Every column but the implicit rowid is nullable; the builder decides
    /// which rows are usable.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT,
                name TEXT,
                confidence REAL,
                source TEXT,
                incident_category TEXT,
                first_seen TEXT,
                verdict TEXT,
                artifacts TEXT
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS leads_verdict ON leads(verdict);"#,
            r#"CREATE INDEX IF NOT EXISTS leads_incident_category ON leads(incident_category);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }

    /// Insert one lead row (fixtures and imports)
    pub async fn insert_lead(&self, row: &RawLeadRow) -> StoreResult<()> {
        let artifacts = row.artifacts.as_ref().map(Value::to_string);
        sqlx::query(
            "INSERT INTO leads (id, name, confidence, source, incident_category, first_seen, verdict, artifacts) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id.clone())
        .bind(row.name.clone())
        .bind(row.confidence)
        .bind(row.source.clone())
        .bind(row.incident_category.clone())
        .bind(row.first_seen.clone())
        .bind(row.verdict.clone())
        .bind(artifacts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn decode_row(row: &SqliteRow) -> StoreResult<(u64, RawLeadRow)> {
        let seq: i64 = row.try_get("seq")?;
        let artifacts: Option<String> = row.try_get("artifacts")?;

        let raw = RawLeadRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            confidence: row.try_get("confidence")?,
            source: row.try_get("source")?,
            incident_category: row.try_get("incident_category")?,
            first_seen: row.try_get("first_seen")?,
            verdict: row.try_get("verdict")?,
            // Undecodable JSON is kept as a bare string so validation flags the row.
            artifacts: artifacts
                .map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text))),
        };
        Ok((seq as u64, raw))
    }
}

/// Narrow the scan in SQL. The result is a superset of what `filter` accepts;
/// [`LeadFilter::matches`] makes the final decision so both stores agree.
fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &LeadFilter) {
    if let Some(min) = filter.min_confidence {
        query.push(" AND (typeof(confidence) NOT IN ('real', 'integer') OR confidence >= ");
        query.push_bind(min);
        query.push(")");
    }
    let exact = [
        ("incident_category", &filter.incident_category, DEFAULT_INCIDENT_CATEGORY),
        ("verdict", &filter.verdict, DEFAULT_VERDICT),
        ("source", &filter.source, DEFAULT_SOURCE),
    ];
    for (column, wanted, default) in exact {
        // Blank cells read as the default, which plain equality cannot see.
        if let Some(wanted) = wanted.as_deref().filter(|w| *w != default) {
            query.push(format!(" AND {} = ", column));
            query.push_bind(wanted.to_string());
        }
    }
    if filter.name_contains.is_some() {
        // SQLite only folds ASCII case; substring matching happens in Rust.
        query.push(" AND typeof(name) = 'text'");
    }
}

#[async_trait]
impl LeadSource for SqliteLeadStore {
    async fn fetch_page(
        &self,
        filter: &LeadFilter,
        after: Option<PageCursor>,
        limit: usize,
    ) -> StoreResult<LeadPage> {
        let limit = limit.max(1);
        let mut cursor = after.map(|c| c.0 as i64).unwrap_or(0);
        let mut page = Vec::with_capacity(limit);

        // Keep scanning until the page is full or the table runs out, so rows
        // rejected in Rust do not shrink pages.
        loop {
            let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
            query.push_bind(cursor);
            push_filter(&mut query, filter);
            query.push(" ORDER BY rowid LIMIT ");
            query.push_bind(limit as i64);

            let rows = query.build().fetch_all(&self.pool).await?;
            let exhausted = rows.len() < limit;

            for row in &rows {
                let (seq, raw) = Self::decode_row(row)?;
                cursor = seq as i64;
                if filter.matches(&raw) {
                    page.push(raw);
                    if page.len() == limit {
                        return Ok(LeadPage {
                            rows: page,
                            next: Some(PageCursor(seq)),
                        });
                    }
                }
            }

            if exhausted {
                return Ok(LeadPage { rows: page, next: None });
            }
        }
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadgraph_types::{LeadRecord, MalformedLead};
    use serde_json::json;

    async fn store() -> SqliteLeadStore {
        // A single connection keeps the in-memory database alive across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteLeadStore::from_pool(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    fn row(id: &str, confidence: f64, category: &str) -> RawLeadRow {
        RawLeadRow {
            id: Some(id.into()),
            name: Some(format!("Lead {}", id)),
            confidence: Some(confidence),
            incident_category: Some(category.into()),
            first_seen: Some("2024-01-01 00:00:00".into()),
            artifacts: Some(json!(["10.0.0.1", "Alias"])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn keyset_pagination_walks_all_rows() {
        let store = store().await;
        for i in 0..5 {
            store.insert_lead(&row(&format!("l{}", i), 0.5, "c2")).await.unwrap();
        }

        let filter = LeadFilter::default();
        let mut after = None;
        let mut seen = Vec::new();
        loop {
            let page = store.fetch_page(&filter, after, 2).await.unwrap();
            seen.extend(page.rows.iter().filter_map(|r| r.id.clone()));
            match page.next {
                Some(next) => after = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["l0", "l1", "l2", "l3", "l4"]);
    }

    #[tokio::test]
    async fn artifacts_round_trip_as_json() {
        let store = store().await;
        store.insert_lead(&row("a", 0.9, "c2")).await.unwrap();

        let page = store
            .fetch_page(&LeadFilter::default(), None, 10)
            .await
            .unwrap();
        assert_eq!(page.rows[0].artifacts, Some(json!(["10.0.0.1", "Alias"])));
        assert_eq!(page.rows[0].first_seen.as_deref(), Some("2024-01-01 00:00:00"));
    }

    #[tokio::test]
    async fn null_columns_come_back_as_none() {
        let store = store().await;
        store
            .insert_lead(&RawLeadRow {
                name: Some("nameless id".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let page = store
            .fetch_page(&LeadFilter::default(), None, 10)
            .await
            .unwrap();
        assert_eq!(page.rows[0].id, None);
        assert_eq!(page.rows[0].confidence, None);
        assert_eq!(page.rows[0].artifacts, None);
    }

    #[tokio::test]
    async fn sql_filter_matches_in_memory_semantics() {
        let store = store().await;
        store.insert_lead(&row("low", 0.2, "c2")).await.unwrap();
        store.insert_lead(&row("high", 0.9, "c2")).await.unwrap();
        store.insert_lead(&row("other", 0.9, "phishing")).await.unwrap();

        let filter = LeadFilter {
            min_confidence: Some(0.5),
            incident_category: Some("c2".into()),
            name_contains: Some("HIGH".into()),
            ..Default::default()
        };
        let page = store.fetch_page(&filter, None, 10).await.unwrap();
        let ids: Vec<_> = page.rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["high"]);
    }

    #[tokio::test]
    async fn mistyped_cells_fail_the_row_not_the_page() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO leads (id, name, confidence, first_seen, artifacts) VALUES \
             ('good', 'Good', 0.5, '2024-01-01 00:00:00', '[]'), \
             ('bad', 'Bad', 'high', '2024-01-01 00:00:00', '[]'), \
             (42, 'Numeric', 1, '2024-01-01 00:00:00', X'00')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let page = store
            .fetch_page(&LeadFilter::default(), None, 10)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 3);

        assert_eq!(page.rows[0].confidence, Some(0.5));
        assert!(LeadRecord::try_from(page.rows[0].clone()).is_ok());

        assert_eq!(page.rows[1].id.as_deref(), Some("bad"));
        assert_eq!(page.rows[1].confidence, None);
        assert_eq!(
            LeadRecord::try_from(page.rows[1].clone()),
            Err(MalformedLead::MissingField("confidence"))
        );

        assert_eq!(page.rows[2].id.as_deref(), Some("42"));
        assert_eq!(page.rows[2].confidence, Some(1.0));
        assert_eq!(page.rows[2].artifacts, None);

        // A text confidence still reaches the builder under a confidence floor.
        let floor = LeadFilter {
            min_confidence: Some(0.9),
            ..Default::default()
        };
        let ids: Vec<_> = store
            .fetch_page(&floor, None, 10)
            .await
            .unwrap()
            .rows
            .into_iter()
            .filter_map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["bad", "42"]);
    }

    #[tokio::test]
    async fn name_filter_agrees_with_memory_store() {
        let rows = vec![
            RawLeadRow {
                name: Some("ÉCOLE Polytech".into()),
                ..row("accented", 0.5, "c2")
            },
            RawLeadRow {
                name: Some("Lead 1000".into()),
                ..row("digits", 0.5, "c2")
            },
            RawLeadRow {
                name: Some("Discount 100%".into()),
                ..row("percent", 0.5, "c2")
            },
        ];
        let sql = store().await;
        for r in &rows {
            sql.insert_lead(r).await.unwrap();
        }
        let memory = crate::InMemoryLeadStore::from_rows(rows);

        for needle in ["école", "100%", "10_0"] {
            let filter = LeadFilter {
                name_contains: Some(needle.into()),
                ..Default::default()
            };
            let from_sql = sql.fetch_page(&filter, None, 10).await.unwrap().rows;
            let from_memory = memory.fetch_page(&filter, None, 10).await.unwrap().rows;
            assert_eq!(from_sql, from_memory, "needle {:?}", needle);
        }
    }

    #[tokio::test]
    async fn default_verdict_selects_blank_cells() {
        let store = store().await;
        store
            .insert_lead(&RawLeadRow {
                verdict: Some("malicious".into()),
                ..row("judged", 0.5, "c2")
            })
            .await
            .unwrap();
        store.insert_lead(&row("unjudged", 0.5, "c2")).await.unwrap();
        store
            .insert_lead(&RawLeadRow {
                verdict: Some("   ".into()),
                ..row("blank", 0.5, "c2")
            })
            .await
            .unwrap();

        let filter = LeadFilter {
            verdict: Some("unassessed".into()),
            ..Default::default()
        };
        let ids: Vec<_> = store
            .fetch_page(&filter, None, 10)
            .await
            .unwrap()
            .rows
            .into_iter()
            .filter_map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["unjudged", "blank"]);
    }

    #[tokio::test]
    async fn rejected_rows_do_not_shrink_pages() {
        let store = store().await;
        for i in 0..6 {
            let name = if i % 2 == 0 { "Even" } else { "Odd" };
            store
                .insert_lead(&RawLeadRow {
                    name: Some(name.into()),
                    ..row(&format!("l{}", i), 0.5, "c2")
                })
                .await
                .unwrap();
        }

        let filter = LeadFilter {
            name_contains: Some("even".into()),
            ..Default::default()
        };
        let first = store.fetch_page(&filter, None, 2).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert!(first.next.is_some());

        let second = store.fetch_page(&filter, first.next, 2).await.unwrap();
        let ids: Vec<_> = second.rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["l4"]);
        assert!(second.is_last());
    }
}
