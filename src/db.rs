use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::document::{Cardinality, GenericDocument, Schema};
use crate::error::{NoteError, Result};
use crate::index::QueryMatcher;
use crate::session::{
    BatchResult, RankingStrategy, ResultCode, SearchResult, SearchResults, SearchSession,
    SearchSpec, SetSchemaRequest,
};

/// Where a named database lives on disk.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub data_dir: PathBuf,
    pub database_name: String,
}

impl SearchContext {
    pub fn new(data_dir: impl Into<PathBuf>, database_name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_name: database_name.into(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", self.database_name))
    }
}

/// On-device [`SearchSession`] backed by SQLite.
///
/// The connection sits behind a `Mutex<Option<_>>` so that every call can run
/// on the blocking pool and `close` can drop it from any thread.
pub struct LocalStorage {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl LocalStorage {
    /// Open (creating if needed) the database described by `context`.
    pub async fn open(context: SearchContext) -> Result<Self> {
        let path = context.database_path();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| NoteError::Initialization(format!("{}: {e}", parent.display())))?;
            }
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            create_tables(&conn)?;
            tracing::info!("Opened note index at {}", path.display());
            Ok(conn)
        })
        .await??;
        Ok(Self::from_connection(conn))
    }

    /// A non-persistent database, gone when the session closes.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            create_tables(&conn)?;
            Ok(conn)
        })
        .await??;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.conn.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| NoteError::Task(format!("connection lock poisoned: {e}")))?;
            let conn = guard.as_mut().ok_or(NoteError::SessionClosed)?;
            f(conn)
        })
        .await?
    }
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schemas (
             schema_type TEXT PRIMARY KEY,
             descriptor  TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS documents (
             namespace   TEXT NOT NULL,
             id          TEXT NOT NULL,
             schema_type TEXT NOT NULL,
             creation_ts INTEGER NOT NULL,
             seq         INTEGER NOT NULL,
             properties  TEXT NOT NULL,
             PRIMARY KEY (namespace, id)
         );
         CREATE INDEX IF NOT EXISTS documents_by_recency
             ON documents (creation_ts DESC, seq DESC);",
    )?;
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn load_schemas(conn: &Connection) -> Result<HashMap<String, Schema>> {
    let mut stmt = conn.prepare("SELECT schema_type, descriptor FROM schemas")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut schemas = HashMap::new();
    for row in rows {
        let (schema_type, descriptor) = row?;
        schemas.insert(schema_type, serde_json::from_str::<Schema>(&descriptor)?);
    }
    Ok(schemas)
}

/// Old documents stay valid under `new`: every old property survives
/// unchanged and no new property is required.
fn is_compatible(old: &Schema, new: &Schema) -> bool {
    let kept = old
        .properties
        .iter()
        .all(|p| new.property(&p.name).is_some_and(|n| n == p));
    let added_optional = new
        .properties
        .iter()
        .filter(|p| old.property(&p.name).is_none())
        .all(|p| p.cardinality != Cardinality::Required);
    kept && added_optional
}

fn count_documents(conn: &Connection, schema_type: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE schema_type = ?1",
        [schema_type],
        |row| row.get(0),
    )?)
}

fn apply_schema(conn: &mut Connection, request: SetSchemaRequest) -> Result<()> {
    let tx = conn.transaction()?;
    let existing = load_schemas(&tx)?;

    for schema in &request.schemas {
        match existing.get(&schema.schema_type) {
            Some(old) if old == schema => continue,
            Some(old) if !is_compatible(old, schema) => {
                if !request.force_override && count_documents(&tx, &schema.schema_type)? > 0 {
                    return Err(NoteError::IncompatibleSchema(format!(
                        "type {} changed and has stored documents",
                        schema.schema_type
                    )));
                }
                let dropped = tx.execute(
                    "DELETE FROM documents WHERE schema_type = ?1",
                    [&schema.schema_type],
                )?;
                if dropped > 0 {
                    tracing::warn!("Dropped {dropped} {} documents on schema override", schema.schema_type);
                }
            }
            _ => {}
        }
        tx.execute(
            "INSERT OR REPLACE INTO schemas (schema_type, descriptor) VALUES (?1, ?2)",
            params![schema.schema_type, serde_json::to_string(schema)?],
        )?;
    }

    for schema_type in existing.keys() {
        if request.schemas.iter().any(|s| &s.schema_type == schema_type) {
            continue;
        }
        if !request.force_override && count_documents(&tx, schema_type)? > 0 {
            return Err(NoteError::IncompatibleSchema(format!(
                "type {schema_type} removed but has stored documents"
            )));
        }
        tx.execute("DELETE FROM documents WHERE schema_type = ?1", [schema_type])?;
        tx.execute("DELETE FROM schemas WHERE schema_type = ?1", [schema_type])?;
    }

    tx.commit()?;
    Ok(())
}

fn put_documents(conn: &mut Connection, documents: Vec<GenericDocument>) -> Result<BatchResult> {
    let tx = conn.transaction()?;
    let schemas = load_schemas(&tx)?;
    let mut seq: i64 = tx.query_row("SELECT COALESCE(MAX(seq), 0) FROM documents", [], |row| {
        row.get(0)
    })?;
    let mut batch = BatchResult::default();

    for doc in documents {
        if doc.id.is_empty() || doc.namespace.is_empty() {
            batch.record_failure(doc.id, ResultCode::InvalidArgument, "namespace and id must be non-empty");
            continue;
        }
        let Some(schema) = schemas.get(&doc.schema_type) else {
            let message = format!("schema type {} not found", doc.schema_type);
            batch.record_failure(doc.id, ResultCode::NotFound, message);
            continue;
        };
        if let Err(reason) = schema.validate(&doc) {
            batch.record_failure(doc.id, ResultCode::InvalidArgument, reason);
            continue;
        }
        seq += 1;
        tx.execute(
            "INSERT OR REPLACE INTO documents
                 (namespace, id, schema_type, creation_ts, seq, properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.namespace,
                doc.id,
                doc.schema_type,
                now_millis(),
                seq,
                serde_json::to_string(&doc.properties)?,
            ],
        )?;
        batch.record_success(doc.id);
    }

    tx.commit()?;
    Ok(batch)
}

fn remove_documents(conn: &mut Connection, namespace: &str, ids: Vec<String>) -> Result<BatchResult> {
    let tx = conn.transaction()?;
    let mut batch = BatchResult::default();
    for id in ids {
        let removed = tx.execute(
            "DELETE FROM documents WHERE namespace = ?1 AND id = ?2",
            params![namespace, id],
        )?;
        if removed == 0 {
            let message = format!("no document {id} in namespace {namespace}");
            batch.record_failure(id, ResultCode::NotFound, message);
        } else {
            batch.record_success(id);
        }
    }
    tx.commit()?;
    Ok(batch)
}

/// All documents matching `matcher`, in ranking order.
fn matching_documents(
    conn: &Connection,
    schemas: &HashMap<String, Schema>,
    matcher: &QueryMatcher,
    spec: &SearchSpec,
) -> Result<Vec<GenericDocument>> {
    let order = match spec.ranking_strategy {
        RankingStrategy::CreationTimestamp => "creation_ts DESC, seq DESC",
        RankingStrategy::None => "seq ASC",
    };
    let sql = format!(
        "SELECT namespace, id, schema_type, creation_ts, properties FROM documents ORDER BY {order}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut matched = Vec::new();
    for row in rows {
        let (namespace, id, schema_type, creation_ts, properties) = row?;
        if !spec.namespaces.is_empty() && !spec.namespaces.contains(&namespace) {
            continue;
        }
        let Some(schema) = schemas.get(&schema_type) else {
            continue;
        };
        let doc = GenericDocument {
            namespace,
            id,
            schema_type,
            creation_timestamp_millis: creation_ts,
            properties: serde_json::from_str(&properties)?,
        };
        if matcher.matches(schema, &doc) {
            matched.push(doc);
        }
    }
    Ok(matched)
}

/// Snapshot of one search's hits, handed out a page at a time.
struct LocalSearchResults {
    matcher: QueryMatcher,
    schemas: HashMap<String, Schema>,
    spec: SearchSpec,
    remaining: VecDeque<GenericDocument>,
}

#[async_trait]
impl SearchResults for LocalSearchResults {
    async fn next_page(&mut self) -> Result<Vec<SearchResult>> {
        let take = self.spec.result_count_per_page.min(self.remaining.len());
        let page = self
            .remaining
            .drain(..take)
            .enumerate()
            .map(|(rank, document)| {
                let match_infos = match self.schemas.get(&document.schema_type) {
                    Some(schema) if rank < self.spec.snippet_count => self.matcher.match_infos(
                        schema,
                        &document,
                        self.spec.max_snippets_per_property,
                    ),
                    _ => Vec::new(),
                };
                SearchResult {
                    document,
                    match_infos,
                }
            })
            .collect();
        Ok(page)
    }
}

#[async_trait]
impl SearchSession for LocalStorage {
    async fn set_schema(&self, request: SetSchemaRequest) -> Result<()> {
        let types: Vec<String> = request.schemas.iter().map(|s| s.schema_type.clone()).collect();
        self.with_conn(move |conn| apply_schema(conn, request)).await?;
        tracing::info!("Registered schema types {types:?}");
        Ok(())
    }

    async fn put(&self, documents: Vec<GenericDocument>) -> Result<BatchResult> {
        let batch = self.with_conn(move |conn| put_documents(conn, documents)).await?;
        tracing::debug!(
            "Put {} documents, {} rejected",
            batch.successes.len(),
            batch.failures.len()
        );
        Ok(batch)
    }

    async fn search(&self, query: &str, spec: SearchSpec) -> Result<Box<dyn SearchResults>> {
        let matcher = QueryMatcher::parse(query);
        let (schemas, hits) = {
            let matcher = matcher.clone();
            let spec = spec.clone();
            self.with_conn(move |conn| {
                let schemas = load_schemas(conn)?;
                let hits = matching_documents(conn, &schemas, &matcher, &spec)?;
                Ok((schemas, hits))
            })
            .await?
        };
        tracing::debug!("Search matched {} documents", hits.len());
        Ok(Box::new(LocalSearchResults {
            matcher,
            schemas,
            spec,
            remaining: hits.into(),
        }))
    }

    async fn remove(&self, namespace: &str, ids: Vec<String>) -> Result<BatchResult> {
        let namespace = namespace.to_string();
        self.with_conn(move |conn| remove_documents(conn, &namespace, ids)).await
    }

    fn close(&self) {
        let mut guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.take().is_some() {
            tracing::info!("Closed note index");
        }
    }
}
