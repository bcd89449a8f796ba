// Document store (SQLite via sqlx).
//
// Every record is a JSON document in one `documents` table keyed by
// (collection, id). Reads deserialize the JSON column; partial updates go
// through SQLite's json_patch so a merge only touches the fields present in
// the patch. `apply_batch` runs a group of writes in a single transaction.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no document {collection}/{id}")]
    Missing { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("version conflict on {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("store clock returned an unparseable timestamp: {0}")]
    Clock(#[from] chrono::ParseError),
}

// ── Queries ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }
}

/// A filtered, ordered read over one collection. Filters compare top-level
/// document fields. Pagination is keyset-based: pass a page's `next` cursor
/// back in via [`Query::after`] to continue where it left off.
#[derive(Debug, Clone)]
pub struct Query {
    collection: String,
    filters: Vec<(String, Op, serde_json::Value)>,
    order: Option<(String, bool)>,
    limit: Option<u32>,
    cursor: Option<Cursor>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Query {
            collection: collection.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
            cursor: None,
        }
    }

    pub fn filter_eq(self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter(field, Op::Eq, value)
    }

    pub fn filter_gt(self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter(field, Op::Gt, value)
    }

    pub fn filter_gte(self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter(field, Op::Gte, value)
    }

    pub fn filter_lt(self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter(field, Op::Lt, value)
    }

    pub fn filter_lte(self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter(field, Op::Lte, value)
    }

    fn filter(mut self, field: &str, op: Op, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push((field.to_string(), op, value.into()));
        self
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.order = Some((field.to_string(), false));
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.order = Some((field.to_string(), true));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continues a previous query. Only meaningful together with the same
    /// order and filters that produced the cursor.
    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Keyset continuation token: the order-field value and id of the last row
/// of a page. Opaque to callers; serializable so UI layers can round-trip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    last_value: serde_json::Value,
    last_id: String,
}

/// One stored document together with its key.
#[derive(Debug, Clone)]
pub struct Document<T> {
    pub id: String,
    pub data: T,
}

/// A page of query results. `next` is set when the page came back full,
/// meaning more rows may follow.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<Document<T>>,
    pub next: Option<Cursor>,
}

// ── Batched writes ───────────────────────────────────────────────────

/// An ordered group of writes applied in one transaction. The first failing
/// op rolls back everything before it.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
enum BatchOp {
    Create {
        collection: String,
        id: String,
        doc: serde_json::Value,
    },
    Upsert {
        collection: String,
        id: String,
        doc: serde_json::Value,
    },
    Merge {
        collection: String,
        id: String,
        patch: serde_json::Value,
    },
    MergeChecked {
        collection: String,
        id: String,
        patch: serde_json::Value,
        expected_version: i64,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn create(mut self, collection: &str, id: &str, doc: serde_json::Value) -> Self {
        self.ops.push(BatchOp::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            doc,
        });
        self
    }

    pub fn upsert(mut self, collection: &str, id: &str, doc: serde_json::Value) -> Self {
        self.ops.push(BatchOp::Upsert {
            collection: collection.to_string(),
            id: id.to_string(),
            doc,
        });
        self
    }

    pub fn merge(mut self, collection: &str, id: &str, patch: serde_json::Value) -> Self {
        self.ops.push(BatchOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        });
        self
    }

    /// Merge guarded by the document's `version` field. The write only lands
    /// if the stored version still equals `expected_version`, and bumps it by
    /// one; a mismatch fails the batch with [`StoreError::Conflict`].
    pub fn merge_checked(
        mut self,
        collection: &str,
        id: &str,
        patch: serde_json::Value,
        expected_version: i64,
    ) -> Self {
        self.ops.push(BatchOp::MergeChecked {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
            expected_version,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.ops.push(BatchOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (or creates) the backing database and runs migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // A SQLite memory database lives and dies with its connection, so
        // the pool must hold exactly one and never recycle it.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub async fn memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                PRIMARY KEY (collection, id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetches one document, `None` when absent.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Fetches one document, failing with [`StoreError::Missing`] when absent.
    pub async fn get_required<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<T, StoreError> {
        self.get(collection, id)
            .await?
            .ok_or_else(|| StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    pub async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn count(&self, collection: &str) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Inserts a new document, failing with [`StoreError::AlreadyExists`] if
    /// the key is taken.
    pub async fn create<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(doc)?;
        let result = sqlx::query("INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(id)
            .bind(data)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Creates or fully replaces a document.
    pub async fn upsert<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(doc)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)
            ON CONFLICT (collection, id) DO UPDATE
            SET data = excluded.data,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
        "#,
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merges `patch` into an existing document (RFC 7386 semantics: nested
    /// objects merge, scalars replace). Fails with [`StoreError::Missing`]
    /// when the document does not exist.
    pub async fn merge(
        &self,
        collection: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = json_patch(data, ?),
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE collection = ? AND id = ?
        "#,
        )
        .bind(patch.to_string())
        .bind(collection)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Deletes a document. Returns whether a row was actually removed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Runs a filtered read. The page's cursor encodes the last row's order
    /// value and id, so continuation never re-reads or skips rows even when
    /// writes land between pages.
    pub async fn query<T: DeserializeOwned>(&self, query: Query) -> Result<Page<T>, StoreError> {
        let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?");
        for (field, op, _) in &query.filters {
            sql.push_str(&format!(
                " AND json_extract(data, '$.{field}') {} ?",
                op.sql()
            ));
        }
        if query.cursor.is_some() {
            if let Some((field, descending)) = &query.order {
                let cmp = if *descending { "<" } else { ">" };
                sql.push_str(&format!(
                    " AND (json_extract(data, '$.{field}'), id) {cmp} (?, ?)"
                ));
            }
        }
        match &query.order {
            Some((field, descending)) => {
                let dir = if *descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(
                    " ORDER BY json_extract(data, '$.{field}') {dir}, id {dir}"
                ));
            }
            None => sql.push_str(" ORDER BY id"),
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut values: Vec<&serde_json::Value> =
            query.filters.iter().map(|(_, _, value)| value).collect();
        if query.order.is_some() {
            if let Some(cursor) = &query.cursor {
                values.push(&cursor.last_value);
            }
        }
        let mut rows = sqlx::query_as::<_, (String, String)>(&sql).bind(&query.collection);
        for value in values {
            rows = match value {
                serde_json::Value::Bool(b) => rows.bind(*b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => rows.bind(i),
                    None => rows.bind(n.as_f64().unwrap_or_default()),
                },
                serde_json::Value::String(s) => rows.bind(s.clone()),
                other => rows.bind(other.to_string()),
            };
        }
        if query.order.is_some() {
            if let Some(cursor) = &query.cursor {
                rows = rows.bind(cursor.last_id.clone());
            }
        }
        let fetched = rows.fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(fetched.len());
        let mut last = None;
        for (id, data) in fetched {
            let raw: serde_json::Value = serde_json::from_str(&data)?;
            if let Some((field, _)) = &query.order {
                last = Some(Cursor {
                    last_value: raw.get(field).cloned().unwrap_or(serde_json::Value::Null),
                    last_id: id.clone(),
                });
            }
            items.push(Document {
                id,
                data: serde_json::from_value(raw)?,
            });
        }
        let next = match (query.limit, last) {
            (Some(limit), Some(cursor)) if items.len() as u32 == limit => Some(cursor),
            _ => None,
        };
        Ok(Page { items, next })
    }

    /// Applies every op in one transaction; any failure rolls back the whole
    /// batch.
    pub async fn apply_batch(&self, batch: Batch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for op in batch.ops {
            match op {
                BatchOp::Create { collection, id, doc } => {
                    let result = sqlx::query(
                        "INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(doc.to_string())
                    .execute(&mut *tx)
                    .await;
                    match result {
                        Ok(_) => {}
                        Err(err) if is_unique_violation(&err) => {
                            return Err(StoreError::AlreadyExists { collection, id });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                BatchOp::Upsert { collection, id, doc } => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)
                        ON CONFLICT (collection, id) DO UPDATE
                        SET data = excluded.data,
                            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                    "#,
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(doc.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
                BatchOp::Merge { collection, id, patch } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE documents
                        SET data = json_patch(data, ?),
                            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                        WHERE collection = ? AND id = ?
                    "#,
                    )
                    .bind(patch.to_string())
                    .bind(&collection)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::Missing { collection, id });
                    }
                }
                BatchOp::MergeChecked {
                    collection,
                    id,
                    patch,
                    expected_version,
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE documents
                        SET data = json_set(json_patch(data, ?), '$.version', ?),
                            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                        WHERE collection = ? AND id = ?
                          AND json_extract(data, '$.version') = ?
                    "#,
                    )
                    .bind(patch.to_string())
                    .bind(expected_version + 1)
                    .bind(&collection)
                    .bind(&id)
                    .bind(expected_version)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::Conflict { collection, id });
                    }
                }
                BatchOp::Delete { collection, id } => {
                    sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// The store's clock, second precision, UTC. Every persisted timestamp
    /// comes from here so records agree on ordering even when callers'
    /// clocks drift.
    pub async fn server_now(&self) -> Result<DateTime<Utc>, StoreError> {
        let now: String = sqlx::query_scalar("SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')")
            .fetch_one(&self.pool)
            .await?;
        Ok(DateTime::parse_from_rfc3339(&now)?.with_timezone(&Utc))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
