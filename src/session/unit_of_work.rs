//! Statement executor contract consumed by sessions.
//!
//! A `StatementExecutor` opens units of work; a `UnitOfWork` runs named
//! statements against one connection until it is closed. Rows cross this
//! boundary as JSON objects keyed by column name.

use crate::error::ExecResult;
use crate::models::{RowBounds, UnitSettings};
use serde_json::Value as JsonValue;
use std::future::Future;

/// Factory for units of work.
///
/// Must be safe to call concurrently: every call to `open` gets its own unit.
pub trait StatementExecutor: Send + Sync {
    type Unit: UnitOfWork;

    /// Open a unit of work configured with `settings`.
    fn open(&self, settings: UnitSettings) -> impl Future<Output = ExecResult<Self::Unit>> + Send;
}

/// One opened, transactionally scoped handle used to run statements.
///
/// Dropping a unit without calling `close` must still release it: pooled
/// connections go back to the pool and uncommitted work is rolled back.
pub trait UnitOfWork: Send {
    /// Run a statement expected to yield at most one row.
    fn select_one(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> impl Future<Output = ExecResult<Option<JsonValue>>> + Send;

    /// Run a statement yielding rows, optionally restricted by `bounds`.
    fn select_list(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
        bounds: Option<RowBounds>,
    ) -> impl Future<Output = ExecResult<Vec<JsonValue>>> + Send;

    /// Returns the number of affected rows.
    fn insert(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> impl Future<Output = ExecResult<u64>> + Send;

    /// Returns the number of affected rows.
    fn update(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> impl Future<Output = ExecResult<u64>> + Send;

    /// Returns the number of affected rows.
    fn delete(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> impl Future<Output = ExecResult<u64>> + Send;

    /// Execute queued batch statements, returning their affected-row counts.
    fn flush_statements(&mut self) -> impl Future<Output = ExecResult<Vec<u64>>> + Send;

    /// Commit pending work. A no-op in auto-commit mode.
    fn commit(&mut self) -> impl Future<Output = ExecResult<()>> + Send;

    /// Discard pending work. A no-op in auto-commit mode.
    fn rollback(&mut self) -> impl Future<Output = ExecResult<()>> + Send;

    /// Release the unit. Uncommitted work is rolled back.
    fn close(self) -> impl Future<Output = ExecResult<()>> + Send;
}
