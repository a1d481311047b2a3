//! Write session: insert, update, delete and custom work over a `WriteConnection`.

use crate::error::{DatabaseError, DbResult};
use crate::models::UnitSettings;
use crate::session::connection::{DatabaseConnection, UnitOf, WriteConnection};
use crate::session::operation::AffectedRows;
use crate::session::unit_of_work::StatementExecutor;
use crate::session::{execute_guarded, run_custom, DatabaseSession};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

/// Session façade over the write role.
///
/// Single mutating statements require an auto-commit role. Grouping several
/// writes into one transaction goes through `custom`.
#[derive(Debug)]
pub struct WriteSession<'c, E> {
    connection: &'c WriteConnection<E>,
}

impl<E> Clone for WriteSession<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for WriteSession<'_, E> {}

impl<'c, E: StatementExecutor> WriteSession<'c, E> {
    pub fn new(connection: &'c WriteConnection<E>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &'c WriteConnection<E> {
        self.connection
    }

    /// Returns the number of inserted rows.
    pub async fn insert(&self, statement: &str) -> DbResult<u64> {
        self.mutate::<()>("insert", AffectedRows::insert(), statement, None)
            .await
    }

    pub async fn insert_with<P>(&self, statement: &str, parameter: &P) -> DbResult<u64>
    where
        P: Serialize + ?Sized,
    {
        self.mutate("insert", AffectedRows::insert(), statement, Some(parameter))
            .await
    }

    /// Returns the number of updated rows.
    pub async fn update(&self, statement: &str) -> DbResult<u64> {
        self.mutate::<()>("update", AffectedRows::update(), statement, None)
            .await
    }

    pub async fn update_with<P>(&self, statement: &str, parameter: &P) -> DbResult<u64>
    where
        P: Serialize + ?Sized,
    {
        self.mutate("update", AffectedRows::update(), statement, Some(parameter))
            .await
    }

    /// Returns the number of deleted rows.
    pub async fn delete(&self, statement: &str) -> DbResult<u64> {
        self.mutate::<()>("delete", AffectedRows::delete(), statement, None)
            .await
    }

    pub async fn delete_with<P>(&self, statement: &str, parameter: &P) -> DbResult<u64>
    where
        P: Serialize + ?Sized,
    {
        self.mutate("delete", AffectedRows::delete(), statement, Some(parameter))
            .await
    }

    async fn mutate<P>(
        &self,
        method: &'static str,
        kind: AffectedRows,
        statement: &str,
        parameter: Option<&P>,
    ) -> DbResult<u64>
    where
        P: Serialize + ?Sized,
    {
        if !self.connection.is_auto_commit() {
            debug!(method, statement, "Rejected mutating call on manual-commit role");
            return Err(DatabaseError::NotAutoCommit);
        }
        execute_guarded(method, self.connection, kind, statement, parameter, None).await
    }
}

impl<E: StatementExecutor> DatabaseSession for WriteSession<'_, E> {
    type Unit = UnitOf<WriteConnection<E>>;

    fn settings(&self) -> UnitSettings {
        self.connection.settings()
    }

    async fn custom<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'u> FnOnce(&'u mut Self::Unit) -> BoxFuture<'u, DbResult<T>>,
    {
        run_custom(self.connection, work).await
    }
}
