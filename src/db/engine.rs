//! Query execution engine.
//!
//! Every execution is request-scoped: it opens its own transient connection,
//! races the statement against the request timeout, normalizes the result
//! and always closes (or abandons) the connection. Network-class failures
//! flip the health tracker and persist a disconnected status before they
//! surface, so the next request fails fast instead of repeating an
//! expensive timeout.
//!
//! # Architecture
//!
//! Statement execution uses engine-specific submodules (`postgres`,
//! `mysql`) with intentionally parallel structure, each binding parameters
//! and collecting result sets for its driver.

use crate::config::{EngineSettings, STREAM_BATCH_SIZE};
use crate::db::cache::ResultCache;
use crate::db::connector::{DbConnection, Dial};
use crate::db::health::HealthTracker;
use crate::error::{DeskError, DeskResult};
use crate::models::{ExecutionResult, QueryParam, RowBatch};
use crate::store::ConnectionStore;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One result set with driver-reported column order.
struct RowSet {
    columns: Vec<String>,
    rows: Vec<serde_json::Map<String, JsonValue>>,
}

/// Raw output of one statement run: every non-empty result set, in order,
/// plus the summed engine-reported affected-row count.
struct RawOutcome {
    row_sets: Vec<RowSet>,
    rows_affected: u64,
}

impl RawOutcome {
    /// The row set callers get: the primary set, or the first non-empty
    /// secondary set when the primary produced nothing. Engines that emit
    /// an empty result for a leading bookkeeping statement before the real
    /// result normalize to the real one this way.
    fn primary(self) -> RowSet {
        self.row_sets.into_iter().next().unwrap_or(RowSet {
            columns: Vec::new(),
            rows: Vec::new(),
        })
    }
}

pub struct ExecutionEngine {
    store: Arc<ConnectionStore>,
    health: Arc<HealthTracker>,
    dial: Arc<dyn Dial>,
    cache: ResultCache,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<ConnectionStore>,
        health: Arc<HealthTracker>,
        dial: Arc<dyn Dial>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            health,
            dial,
            cache: ResultCache::new(),
            settings,
        }
    }

    /// Execute raw SQL against a registered connection.
    pub async fn execute(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[QueryParam],
        cache_key: Option<&str>,
    ) -> DeskResult<ExecutionResult> {
        if self.health.is_marked_down(connection_id).await {
            return Err(DeskError::disconnected(connection_id));
        }
        if sql.trim().is_empty() {
            return Err(DeskError::invalid_argument("sql cannot be empty"));
        }
        let def = self.store.get(connection_id).await?;

        debug!(
            connection_id = %connection_id,
            target = %def.masked(),
            params = params.len(),
            "Executing query"
        );

        let started = Instant::now();
        let mut conn = match self.dial.connect(&def).await {
            Ok(conn) => conn,
            Err(e) => {
                self.note_network_failure(connection_id, &e).await;
                return Err(e);
            }
        };

        let outcome = timeout(
            self.settings.request_timeout,
            run_statements(&mut conn, sql, params),
        )
        .await;

        let raw = match outcome {
            Err(_) => {
                // Abandon the connection: dropping the handle closes the
                // socket, which is the hard cancel the driver offers.
                drop(conn);
                warn!(
                    connection_id = %connection_id,
                    timeout_secs = self.settings.request_timeout.as_secs(),
                    "Query timed out; connection abandoned"
                );
                return Err(DeskError::query_timeout(
                    self.settings.request_timeout.as_secs(),
                ));
            }
            Ok(Ok(raw)) => {
                conn.close(connection_id).await;
                raw
            }
            Ok(Err(e)) => {
                conn.close(connection_id).await;
                if e.is_network_class() {
                    self.note_network_failure(connection_id, &e).await;
                }
                return Err(e);
            }
        };

        let rows_affected = raw.rows_affected;
        let primary = raw.primary();
        let result = ExecutionResult::new(
            primary.columns,
            primary.rows,
            rows_affected,
            started.elapsed().as_millis() as u64,
        );

        debug!(
            connection_id = %connection_id,
            rows = result.row_count,
            elapsed_ms = result.elapsed_ms,
            "Query finished"
        );

        if let Some(key) = cache_key {
            if !result.is_empty() {
                self.cache.insert(key, Arc::new(result.clone())).await;
            }
        }

        Ok(result)
    }

    /// Execute and deliver the normalized rows as fixed-size batches over a
    /// push channel. Each batch carries the running total and a completion
    /// flag; an empty result still sends one final empty batch.
    pub async fn execute_streaming(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[QueryParam],
        sender: mpsc::Sender<RowBatch>,
    ) -> DeskResult<()> {
        let result = self.execute(connection_id, sql, params, None).await?;
        for batch in batch_rows(result.rows, STREAM_BATCH_SIZE) {
            if sender.send(batch).await.is_err() {
                debug!(connection_id = %connection_id, "Stream receiver dropped");
                break;
            }
        }
        Ok(())
    }

    /// Look up a previously cached result. Never consulted automatically.
    pub async fn cached(&self, cache_key: &str) -> Option<Arc<ExecutionResult>> {
        self.cache.get(cache_key).await
    }

    async fn note_network_failure(&self, connection_id: &str, err: &DeskError) {
        warn!(
            connection_id = %connection_id,
            error = %err,
            "Network-class failure; marking connection down"
        );
        self.health.set_usable(connection_id, false).await;
        if let Err(store_err) = self
            .store
            .mark_network_failure(connection_id, &err.to_string())
            .await
        {
            warn!(
                connection_id = %connection_id,
                error = %store_err,
                "Failed to persist disconnected status"
            );
        }
    }
}

/// Split normalized rows into streamed batches.
fn batch_rows(
    rows: Vec<serde_json::Map<String, JsonValue>>,
    batch_size: usize,
) -> Vec<RowBatch> {
    let total = rows.len();
    if rows.is_empty() {
        return vec![RowBatch {
            rows: Vec::new(),
            total: 0,
            is_complete: true,
        }];
    }

    let mut batches = Vec::with_capacity(total.div_ceil(batch_size));
    let mut current = Vec::new();
    for row in rows {
        current.push(row);
        if current.len() == batch_size {
            batches.push(RowBatch {
                rows: std::mem::take(&mut current),
                total,
                is_complete: false,
            });
        }
    }
    if !current.is_empty() {
        batches.push(RowBatch {
            rows: current,
            total,
            is_complete: false,
        });
    }
    if let Some(last) = batches.last_mut() {
        last.is_complete = true;
    }
    batches
}

async fn run_statements(
    conn: &mut DbConnection,
    sql: &str,
    params: &[QueryParam],
) -> DeskResult<RawOutcome> {
    match conn {
        DbConnection::Postgres(c) => postgres::run(c, sql, params).await,
        DbConnection::MySql(c) => mysql::run(c, sql, params).await,
    }
}

// =============================================================================
// Engine-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its driver.
// The code structure is intentionally parallel to make differences obvious.

mod postgres {
    use super::*;
    use crate::db::rows::RowToJson;
    use futures_util::TryStreamExt;
    use sqlx::Either;
    use sqlx::postgres::{PgArguments, PgConnection};

    pub async fn run(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DeskResult<RawOutcome> {
        let mut row_sets: Vec<RowSet> = Vec::new();
        let mut columns: Vec<String> = Vec::new();
        let mut current = Vec::new();
        let mut rows_affected = 0u64;

        // Without parameters, run the raw SQL so multi-statement scripts
        // and statements that reject preparation still work.
        let mut stream = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_many(sql)
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch_many(conn)
        };

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                    if !current.is_empty() {
                        row_sets.push(RowSet {
                            columns: std::mem::take(&mut columns),
                            rows: std::mem::take(&mut current),
                        });
                    }
                }
                Either::Right(row) => {
                    if current.is_empty() {
                        columns = row.column_names();
                    }
                    current.push(row.to_json_map());
                }
            }
        }
        if !current.is_empty() {
            row_sets.push(RowSet {
                columns,
                rows: current,
            });
        }

        Ok(RawOutcome {
            row_sets,
            rows_affected,
        })
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod mysql {
    use super::*;
    use crate::db::rows::RowToJson;
    use futures_util::TryStreamExt;
    use sqlx::Either;
    use sqlx::mysql::{MySqlArguments, MySqlConnection};

    pub async fn run(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DeskResult<RawOutcome> {
        let mut row_sets: Vec<RowSet> = Vec::new();
        let mut columns: Vec<String> = Vec::new();
        let mut current = Vec::new();
        let mut rows_affected = 0u64;

        let mut stream = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_many(sql)
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch_many(conn)
        };

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                    if !current.is_empty() {
                        row_sets.push(RowSet {
                            columns: std::mem::take(&mut columns),
                            rows: std::mem::take(&mut current),
                        });
                    }
                }
                Either::Right(row) => {
                    if current.is_empty() {
                        columns = row.column_names();
                    }
                    current.push(row.to_json_map());
                }
            }
        }
        if !current.is_empty() {
            row_sets.push(RowSet {
                columns,
                rows: current,
            });
        }

        Ok(RawOutcome {
            row_sets,
            rows_affected,
        })
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionDefinition, ConnectionStatus, EngineKind, NewConnection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Dial stub that never reaches a network and counts connect calls.
    struct CountingDial {
        connects: AtomicUsize,
    }

    impl CountingDial {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Dial for CountingDial {
        async fn connect(&self, _def: &ConnectionDefinition) -> DeskResult<DbConnection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(DeskError::connect_failed(3, "stub: connection refused"))
        }

        async fn probe(&self, def: &ConnectionDefinition) -> DeskResult<()> {
            self.connect(def).await.map(|_| ())
        }
    }

    async fn engine_with_connection(
        dir: &tempfile::TempDir,
    ) -> (ExecutionEngine, Arc<ConnectionStore>, Arc<HealthTracker>, Arc<CountingDial>, String)
    {
        let store = Arc::new(ConnectionStore::new(dir.path().join("connections.json")));
        let def = store
            .create(NewConnection {
                name: "warehouse".to_string(),
                engine: EngineKind::PostgreSQL,
                host: "db.internal".to_string(),
                port: None,
                database: "sales".to_string(),
                username: "reporter".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();

        let dial = CountingDial::new();
        let health = Arc::new(HealthTracker::new(
            Arc::clone(&store),
            dial.clone() as Arc<dyn Dial>,
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&health),
            dial.clone() as Arc<dyn Dial>,
            EngineSettings::default(),
        );
        (engine, store, health, dial, def.id)
    }

    #[tokio::test]
    async fn test_disconnected_fast_fails_without_dialing() {
        let dir = tempdir().unwrap();
        let (engine, _store, health, dial, id) = engine_with_connection(&dir).await;

        health.disconnect(&id).await.unwrap();
        let err = engine.execute(&id, "SELECT 1", &[], None).await.unwrap_err();

        assert!(matches!(err, DeskError::Disconnected { .. }));
        assert_eq!(dial.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_not_found() {
        let dir = tempdir().unwrap();
        let (engine, _store, _health, dial, _id) = engine_with_connection(&dir).await;

        let err = engine
            .execute("missing", "SELECT 1", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::NotFound { .. }));
        assert_eq!(dial.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_sql_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let (engine, _store, _health, dial, id) = engine_with_connection(&dir).await;

        let err = engine.execute(&id, "   ", &[], None).await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidArgument { .. }));
        assert_eq!(dial.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_connection_down() {
        let dir = tempdir().unwrap();
        let (engine, store, health, dial, id) = engine_with_connection(&dir).await;

        let err = engine.execute(&id, "SELECT 1", &[], None).await.unwrap_err();
        assert!(matches!(err, DeskError::ConnectFailed { .. }));
        assert_eq!(dial.connects.load(Ordering::SeqCst), 1);

        // Side effect: tracker down, durable status disconnected.
        assert!(health.is_marked_down(&id).await);
        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.status, ConnectionStatus::Disconnected);
        assert!(stored.error_message.is_some());

        // And the next call fast-fails without another dial.
        let err = engine.execute(&id, "SELECT 1", &[], None).await.unwrap_err();
        assert!(matches!(err, DeskError::Disconnected { .. }));
        assert_eq!(dial.connects.load(Ordering::SeqCst), 1);
    }

    fn rows(n: usize) -> Vec<serde_json::Map<String, JsonValue>> {
        (0..n)
            .map(|i| {
                let mut row = serde_json::Map::new();
                row.insert("n".to_string(), JsonValue::from(i as i64));
                row
            })
            .collect()
    }

    #[test]
    fn test_batch_rows_chunking() {
        let batches = batch_rows(rows(2500), 1000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].rows.len(), 1000);
        assert_eq!(batches[1].rows.len(), 1000);
        assert_eq!(batches[2].rows.len(), 500);
        assert!(batches.iter().all(|b| b.total == 2500));
        assert!(!batches[0].is_complete);
        assert!(!batches[1].is_complete);
        assert!(batches[2].is_complete);
    }

    #[test]
    fn test_batch_rows_exact_multiple() {
        let batches = batch_rows(rows(2000), 1000);
        assert_eq!(batches.len(), 2);
        assert!(batches[1].is_complete);
    }

    #[test]
    fn test_batch_rows_empty_sends_single_complete_batch() {
        let batches = batch_rows(Vec::new(), 1000);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].rows.is_empty());
        assert_eq!(batches[0].total, 0);
        assert!(batches[0].is_complete);
    }
}
