//! Read session: selects and custom work over a `ReadConnection`.

use crate::error::{DatabaseError, DbResult};
use crate::models::{RowBounds, UnitSettings};
use crate::session::connection::{DatabaseConnection, ReadConnection, UnitOf};
use crate::session::operation::{Handled, Operation, SelectList, SelectMap, SelectOne};
use crate::session::unit_of_work::StatementExecutor;
use crate::session::{execute_guarded, guarded, run_custom, DatabaseSession};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::ControlFlow;

/// Session façade over the read role.
///
/// Every call opens its own read-only, auto-commit unit of work.
#[derive(Debug)]
pub struct ReadSession<'c, E> {
    connection: &'c ReadConnection<E>,
}

impl<E> Clone for ReadSession<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ReadSession<'_, E> {}

impl<'c, E: StatementExecutor> ReadSession<'c, E> {
    pub fn new(connection: &'c ReadConnection<E>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &'c ReadConnection<E> {
        self.connection
    }

    /// Fetch at most one row. No row is `Ok(None)`.
    pub async fn select_one<T>(&self, statement: &str) -> DbResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        execute_guarded::<_, _, ()>(
            "select_one",
            self.connection,
            SelectOne::new(),
            statement,
            None,
            None,
        )
        .await
    }

    pub async fn select_one_with<T, P>(&self, statement: &str, parameter: &P) -> DbResult<Option<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        execute_guarded(
            "select_one",
            self.connection,
            SelectOne::new(),
            statement,
            Some(parameter),
            None,
        )
        .await
    }

    /// Fetch every row. No rows is an empty vector.
    pub async fn select_list<T>(&self, statement: &str) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        execute_guarded::<_, _, ()>(
            "select_list",
            self.connection,
            SelectList::new(),
            statement,
            None,
            None,
        )
        .await
    }

    pub async fn select_list_with<T, P>(&self, statement: &str, parameter: &P) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        execute_guarded(
            "select_list",
            self.connection,
            SelectList::new(),
            statement,
            Some(parameter),
            None,
        )
        .await
    }

    /// Fetch the rows inside `bounds`, without a parameter.
    pub async fn select_list_bounded<T>(&self, statement: &str, bounds: RowBounds) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        execute_guarded::<_, _, ()>(
            "select_list",
            self.connection,
            SelectList::new(),
            statement,
            None,
            Some(bounds),
        )
        .await
    }

    pub async fn select_list_with_bounds<T, P>(
        &self,
        statement: &str,
        parameter: &P,
        bounds: RowBounds,
    ) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        execute_guarded(
            "select_list",
            self.connection,
            SelectList::new(),
            statement,
            Some(parameter),
            Some(bounds),
        )
        .await
    }

    /// Fetch rows grouped by the `map_key` column.
    ///
    /// Pass `&()` as the parameter when the statement takes none.
    pub async fn select_map<K, V, P>(
        &self,
        statement: &str,
        parameter: &P,
        map_key: &str,
        bounds: Option<RowBounds>,
    ) -> DbResult<HashMap<K, V>>
    where
        K: DeserializeOwned + Eq + Hash,
        V: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        execute_guarded(
            "select_map",
            self.connection,
            SelectMap::new(map_key),
            statement,
            Some(parameter),
            bounds,
        )
        .await
    }

    /// Deliver rows to `handler` until it returns `ControlFlow::Break`.
    ///
    /// Returns the number of rows delivered.
    pub async fn select_with_handler<T, P, H>(
        &self,
        statement: &str,
        parameter: &P,
        bounds: Option<RowBounds>,
        handler: H,
    ) -> DbResult<usize>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
        H: FnMut(T) -> ControlFlow<()>,
    {
        execute_guarded(
            "select_with_handler",
            self.connection,
            Handled::new(handler),
            statement,
            Some(parameter),
            bounds,
        )
        .await
    }

    /// Lazy cursor retrieval is not supported; use `select_with_handler`.
    ///
    /// The statement name is still validated first.
    pub async fn select_cursor<T, P>(
        &self,
        statement: &str,
        _parameter: &P,
        _bounds: Option<RowBounds>,
    ) -> DbResult<BoxStream<'static, DbResult<T>>>
    where
        T: DeserializeOwned + 'static,
        P: Serialize + ?Sized,
    {
        guarded("select_cursor", async {
            Operation::new(SelectList::<T>::new(), statement).validate()?;
            Err(DatabaseError::not_supported("select_cursor"))
        })
        .await
    }
}

impl<E: StatementExecutor> DatabaseSession for ReadSession<'_, E> {
    type Unit = UnitOf<ReadConnection<E>>;

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
