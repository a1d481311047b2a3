//! sqlx-backed statement executor.
//!
//! `SqlxExecutor` opens units of work on a `DbPool`. A unit owns one pooled
//! connection (auto-commit) or one open transaction (manual commit) until it
//! is closed or dropped, and runs registered statements on it:
//! - statement names are resolved through the `StatementRegistry`
//! - parameters are bound by placeholder path
//! - row bounds are applied while streaming (only needed rows are decoded)
//! - every statement is bounded by the statement timeout
//!
//! The execution strategy decides how statements are prepared: `Simple`
//! bypasses the prepared-statement cache, `Reuse` keeps statements cached on
//! the connection, `Batch` queues writes until they are flushed.
//!
//! # Architecture
//!
//! Backend-specific code lives in the `mysql`, `postgres` and `sqlite`
//! submodules, which provide identical functions adapted to each backend.

use crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS;
use crate::db::macros::impl_db_dispatch;
use crate::db::params::{BindValue, resolve_bindings};
use crate::db::pool::DbPool;
use crate::db::registry::{StatementClass, StatementRegistry};
use crate::db::types::RowToJson;
use crate::error::{ExecResult, ExecutorError};
use crate::models::{DatabaseType, RowBounds, StatementCall, UnitSettings};
use crate::session::unit_of_work::{StatementExecutor, UnitOfWork};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::{Database, MySql, Pool, Postgres, Sqlite, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Statement executor over a sqlx pool and a statement registry.
#[derive(Debug, Clone)]
pub struct SqlxExecutor {
    pool: DbPool,
    registry: Arc<StatementRegistry>,
    statement_timeout: Duration,
}

impl SqlxExecutor {
    pub fn new(pool: DbPool, registry: Arc<StatementRegistry>) -> Self {
        Self {
            pool,
            registry,
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.statement_timeout = statement_timeout;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn registry(&self) -> &StatementRegistry {
        &self.registry
    }
}

impl StatementExecutor for SqlxExecutor {
    type Unit = SqlxUnitOfWork;

    async fn open(&self, settings: UnitSettings) -> ExecResult<SqlxUnitOfWork> {
        let auto_commit = settings.auto_commit;
        let handle = match &self.pool {
            DbPool::MySql(p) => DbHandle::MySql(Handle::open(p, auto_commit).await?),
            DbPool::Postgres(p) => DbHandle::Postgres(Handle::open(p, auto_commit).await?),
            DbPool::SQLite(p) => DbHandle::SQLite(Handle::open(p, auto_commit).await?),
        };

        let id = format!("uow_{}", uuid::Uuid::new_v4());
        debug!(
            unit_id = %id,
            read_only = settings.read_only,
            auto_commit = settings.auto_commit,
            strategy = %settings.strategy,
            "Opened unit of work"
        );

        Ok(SqlxUnitOfWork {
            id,
            handle,
            settings,
            db_type: self.pool.db_type(),
            registry: Arc::clone(&self.registry),
            statement_timeout: self.statement_timeout,
            pending: Vec::new(),
        })
    }
}

/// Pooled connection or open transaction owned by a unit of work.
enum HandleState<DB: Database> {
    Connection(PoolConnection<DB>),
    Transaction(Transaction<'static, DB>),
    Released,
}

struct Handle<DB: Database> {
    pool: Pool<DB>,
    state: HandleState<DB>,
}

impl<DB: Database> Handle<DB> {
    async fn open(pool: &Pool<DB>, auto_commit: bool) -> ExecResult<Self> {
        let state = if auto_commit {
            HandleState::Connection(pool.acquire().await?)
        } else {
            HandleState::Transaction(pool.begin().await?)
        };
        Ok(Self {
            pool: pool.clone(),
            state,
        })
    }

    fn connection(&mut self) -> ExecResult<&mut DB::Connection> {
        match &mut self.state {
            HandleState::Connection(c) => Ok(&mut **c),
            HandleState::Transaction(tx) => Ok(&mut **tx),
            HandleState::Released => Err(ExecutorError::Released),
        }
    }

    /// Commit or roll back the open transaction and begin the next one.
    /// A no-op on auto-commit handles.
    async fn finish(&mut self, commit: bool) -> ExecResult<()> {
        match std::mem::replace(&mut self.state, HandleState::Released) {
            HandleState::Transaction(tx) => {
                if commit {
                    tx.commit().await?;
                } else {
                    tx.rollback().await?;
                }
                self.state = HandleState::Transaction(self.pool.begin().await?);
                Ok(())
            }
            HandleState::Released => Err(ExecutorError::Released),
            connection => {
                self.state = connection;
                Ok(())
            }
        }
    }

    /// Roll back any open transaction and return the connection to the pool.
    async fn release(&mut self) -> ExecResult<()> {
        match std::mem::replace(&mut self.state, HandleState::Released) {
            HandleState::Transaction(tx) => tx.rollback().await?,
            HandleState::Connection(conn) => drop(conn),
            HandleState::Released => return Err(ExecutorError::Released),
        }
        Ok(())
    }
}

enum DbHandle {
    MySql(Handle<MySql>),
    Postgres(Handle<Postgres>),
    SQLite(Handle<Sqlite>),
}

/// Statement ready to run: rendered SQL plus bound values.
struct Prepared {
    sql: String,
    values: Vec<BindValue>,
}

/// Write queued by the batch strategy.
struct PendingWrite {
    statement: String,
    prepared: Prepared,
}

/// Unit of work over one sqlx connection.
pub struct SqlxUnitOfWork {
    id: String,
    handle: DbHandle,
    settings: UnitSettings,
    db_type: DatabaseType,
    registry: Arc<StatementRegistry>,
    statement_timeout: Duration,
    pending: Vec<PendingWrite>,
}

impl std::fmt::Debug for SqlxUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxUnitOfWork")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("db_type", &self.db_type)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl SqlxUnitOfWork {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> UnitSettings {
        self.settings
    }

    /// Number of writes queued by the batch strategy.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn prepare(
        &self,
        statement: &str,
        call: StatementCall,
        parameter: Option<&JsonValue>,
    ) -> ExecResult<Prepared> {
        let mapped = self
            .registry
            .get(statement)
            .ok_or_else(|| ExecutorError::unknown_statement(statement))?;

        if self.settings.read_only
            && (call.is_write() || mapped.class() == StatementClass::Write)
        {
            return Err(ExecutorError::read_only_violation(statement));
        }

        let values = resolve_bindings(statement, mapped.bindings(), parameter)?;
        Ok(Prepared {
            sql: mapped.render(self.db_type),
            values,
        })
    }

    async fn query(
        &mut self,
        statement: &str,
        prepared: Prepared,
        bounds: RowBounds,
    ) -> ExecResult<Vec<JsonValue>> {
        self.flush_pending().await?;

        debug!(
            unit_id = %self.id,
            statement,
            params = prepared.values.len(),
            offset = bounds.offset,
            limit = bounds.limit,
            "Executing query"
        );

        let persistent = self.settings.strategy.caches_statements();
        let sql = prepared.sql.as_str();
        let values = prepared.values.as_slice();
        let handle = &mut self.handle;
        bounded("query execution", self.statement_timeout, async move {
            impl_db_dispatch!(DbHandle, handle, {
                MySql(h) => mysql::fetch_rows(h.connection()?, sql, values, bounds, persistent).await,
                Postgres(h) => postgres::fetch_rows(h.connection()?, sql, values, bounds, persistent).await,
                SQLite(h) => sqlite::fetch_rows(h.connection()?, sql, values, bounds, persistent).await,
            })
        })
        .await
    }

    async fn write(
        &mut self,
        statement: &str,
        call: StatementCall,
        parameter: Option<&JsonValue>,
    ) -> ExecResult<u64> {
        let prepared = self.prepare(statement, call, parameter)?;

        if self.settings.strategy.is_batch() {
            debug!(unit_id = %self.id, statement, "Queued batch write");
            self.pending.push(PendingWrite {
                statement: statement.to_string(),
                prepared,
            });
            return Ok(0);
        }

        self.execute_write(statement, &prepared).await
    }

    async fn execute_write(&mut self, statement: &str, prepared: &Prepared) -> ExecResult<u64> {
        debug!(
            unit_id = %self.id,
            statement,
            params = prepared.values.len(),
            "Executing write"
        );

        let persistent = self.settings.strategy.caches_statements();
        let sql = prepared.sql.as_str();
        let values = prepared.values.as_slice();
        let handle = &mut self.handle;
        bounded("write operation", self.statement_timeout, async move {
            impl_db_dispatch!(DbHandle, handle, {
                MySql(h) => mysql::execute(h.connection()?, sql, values, persistent).await,
                Postgres(h) => postgres::execute(h.connection()?, sql, values, persistent).await,
                SQLite(h) => sqlite::execute(h.connection()?, sql, values, persistent).await,
            })
        })
        .await
    }

    /// Execute queued writes in order.
    async fn flush_pending(&mut self) -> ExecResult<Vec<u64>> {
        let pending = std::mem::take(&mut self.pending);
        let mut counts = Vec::with_capacity(pending.len());
        for write in pending {
            counts.push(self.execute_write(&write.statement, &write.prepared).await?);
        }
        Ok(counts)
    }
}

impl UnitOfWork for SqlxUnitOfWork {
    async fn select_one(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> ExecResult<Option<JsonValue>> {
        let prepared = self.prepare(statement, StatementCall::SelectOne, parameter)?;
        let mut rows = self
            .query(statement, prepared, RowBounds::limit(2))
            .await?;
        if rows.len() > 1 {
            return Err(ExecutorError::too_many_rows(statement));
        }
        Ok(rows.pop())
    }

    async fn select_list(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
        bounds: Option<RowBounds>,
    ) -> ExecResult<Vec<JsonValue>> {
        let prepared = self.prepare(statement, StatementCall::SelectList, parameter)?;
        self.query(statement, prepared, bounds.unwrap_or_default())
            .await
    }

    async fn insert(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.write(statement, StatementCall::Insert, parameter).await
    }

    async fn update(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.write(statement, StatementCall::Update, parameter).await
    }

    async fn delete(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.write(statement, StatementCall::Delete, parameter).await
    }

    async fn flush_statements(&mut self) -> ExecResult<Vec<u64>> {
        self.flush_pending().await
    }

    async fn commit(&mut self) -> ExecResult<()> {
        self.flush_pending().await?;
        impl_db_dispatch!(DbHandle, &mut self.handle, |h| h.finish(true).await)?;
        debug!(unit_id = %self.id, "Committed unit of work");
        Ok(())
    }

    async fn rollback(&mut self) -> ExecResult<()> {
        let discarded = std::mem::take(&mut self.pending).len();
        impl_db_dispatch!(DbHandle, &mut self.handle, |h| h.finish(false).await)?;
        debug!(unit_id = %self.id, discarded, "Rolled back unit of work");
        Ok(())
    }

    async fn close(mut self) -> ExecResult<()> {
        let flushed = self.flush_pending().await;
        if flushed.is_err() {
            self.pending.clear();
        }
        let released = impl_db_dispatch!(DbHandle, &mut self.handle, |h| h.release().await);
        debug!(unit_id = %self.id, "Closed unit of work");
        flushed?;
        released
    }
}

impl Drop for SqlxUnitOfWork {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                unit_id = %self.id,
                discarded = self.pending.len(),
                "Unit of work dropped with unflushed batch writes"
            );
        }
    }
}

/// Bound `fut` by `limit`.
async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> ExecResult<T>
where
    F: Future<Output = ExecResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::timeout(operation, limit)),
    }
}

/// Decode the rows of `stream` that fall inside `bounds`.
async fn collect_bounded<R: RowToJson>(
    mut stream: BoxStream<'_, Result<R, sqlx::Error>>,
    bounds: RowBounds,
) -> ExecResult<Vec<JsonValue>> {
    let mut rows = Vec::new();
    let mut skipped = 0;
    while rows.len() < bounds.limit {
        let Some(row) = stream.try_next().await? else {
            break;
        };
        if skipped < bounds.offset {
            skipped += 1;
            continue;
        }
        rows.push(row.to_json_object());
    }
    Ok(rows)
}

// Each module below provides the same interface adapted to its database type.
// Without bound values and without statement caching, SQL is sent unprepared.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::{Executor, MySqlConnection};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        values: &[BindValue],
        bounds: RowBounds,
        persistent: bool,
    ) -> ExecResult<Vec<JsonValue>> {
        let stream = if values.is_empty() && !persistent {
            conn.fetch(sql)
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_mysql_param(query, value);
            }
            query.fetch(conn)
        };
        collect_bounded(stream, bounds).await
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        values: &[BindValue],
        persistent: bool,
    ) -> ExecResult<u64> {
        let result = if values.is_empty() && !persistent {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_mysql_param(query, value);
            }
            query.execute(conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::{Executor, PgConnection};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        values: &[BindValue],
        bounds: RowBounds,
        persistent: bool,
    ) -> ExecResult<Vec<JsonValue>> {
        let stream = if values.is_empty() && !persistent {
            conn.fetch(sql)
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_postgres_param(query, value);
            }
            query.fetch(conn)
        };
        collect_bounded(stream, bounds).await
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        values: &[BindValue],
        persistent: bool,
    ) -> ExecResult<u64> {
        let result = if values.is_empty() && !persistent {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_postgres_param(query, value);
            }
            query.execute(conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::{Executor, SqliteConnection};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        values: &[BindValue],
        bounds: RowBounds,
        persistent: bool,
    ) -> ExecResult<Vec<JsonValue>> {
        let stream = if values.is_empty() && !persistent {
            conn.fetch(sql)
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_sqlite_param(query, value);
            }
            query.fetch(conn)
        };
        collect_bounded(stream, bounds).await
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        values: &[BindValue],
        persistent: bool,
    ) -> ExecResult<u64> {
        let result = if values.is_empty() && !persistent {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql).persistent(persistent);
            for value in values {
                query = bind_sqlite_param(query, value);
            }
            query.execute(conn).await?
        };
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: ExecResult<()> = bounded("query execution", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded("write operation", Duration::from_secs(1), async { Ok(7u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    async fn sqlite_executor() -> (tempfile::TempDir, SqlxExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("unit.db").display());
        let config = crate::config::DataSourceConfig::parse(&url).unwrap();
        let pool = DbPool::connect(&config).await.unwrap();
        let registry = StatementRegistry::new()
            .with_statement("t.create", "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap()
            .with_statement("t.add", "INSERT INTO t (v) VALUES (#{v})")
            .unwrap()
            .with_statement("t.all", "SELECT id, v FROM t ORDER BY id")
            .unwrap();
        (dir, SqlxExecutor::new(pool, Arc::new(registry)))
    }

    #[tokio::test]
    async fn test_unknown_statement() {
        let (_dir, executor) = sqlite_executor().await;
        let mut unit = executor.open(UnitSettings::READ).await.unwrap();
        let err = unit.select_list("t.missing", None, None).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownStatement { .. }));
        unit.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_unit_rejects_writes() {
        let (_dir, executor) = sqlite_executor().await;
        let mut unit = executor.open(UnitSettings::READ).await.unwrap();
        let param = serde_json::json!({"v": "x"});
        let err = unit.insert("t.add", Some(&param)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ReadOnlyViolation { .. }));
        // Classified as a write even through a select call
        let err = unit.select_list("t.create", None, None).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ReadOnlyViolation { .. }));
        unit.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_writes_flush_before_select() {
        let (_dir, executor) = sqlite_executor().await;
        let settings = UnitSettings {
            strategy: crate::models::ExecutionStrategy::Batch,
            ..UnitSettings::WRITE
        };
        let mut unit = executor.open(settings).await.unwrap();
        assert_eq!(unit.update("t.create", None).await.unwrap(), 0);
        let param = serde_json::json!({"v": "a"});
        assert_eq!(unit.insert("t.add", Some(&param)).await.unwrap(), 0);
        assert_eq!(unit.pending_writes(), 2);

        let rows = unit.select_list("t.all", None, None).await.unwrap();
        assert_eq!(unit.pending_writes(), 0);
        assert_eq!(rows, vec![serde_json::json!({"id": 1, "v": "a"})]);
        unit.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_commit_rollback() {
        let (_dir, executor) = sqlite_executor().await;
        let mut setup = executor.open(UnitSettings::WRITE).await.unwrap();
        setup.update("t.create", None).await.unwrap();
        setup.close().await.unwrap();

        let manual = UnitSettings {
            auto_commit: false,
            ..UnitSettings::WRITE
        };
        let mut unit = executor.open(manual).await.unwrap();
        let param = serde_json::json!({"v": "discarded"});
        unit.insert("t.add", Some(&param)).await.unwrap();
        unit.rollback().await.unwrap();
        let param = serde_json::json!({"v": "kept"});
        unit.insert("t.add", Some(&param)).await.unwrap();
        unit.commit().await.unwrap();
        unit.close().await.unwrap();

        let mut reader = executor.open(UnitSettings::READ).await.unwrap();
        let rows = reader.select_list("t.all", None, None).await.unwrap();
        reader.close().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["v"], "kept");
    }
}
