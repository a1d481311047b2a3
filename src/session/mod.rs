//! Read and write sessions over connection roles.
//!
//! A session borrows a connection role and exposes typed statement methods.
//! Every method runs through one error-mapping boundary so callers only ever
//! see `DatabaseError`, including for panics raised while the work runs.

pub mod connection;
pub mod operation;
pub mod read;
pub mod unit_of_work;
pub mod write;

pub use connection::{DatabaseConnection, ReadConnection, UnitOf, WriteConnection};
pub use operation::{
    AffectedRows, Dispatch, Handled, Operation, ResultKind, SelectList, SelectMap, SelectOne,
};
pub use read::ReadSession;
pub use unit_of_work::{StatementExecutor, UnitOfWork};
pub use write::WriteSession;

use crate::error::{DatabaseError, DbResult, Panicked};
use crate::models::{RowBounds, UnitSettings};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Contract shared by read and write sessions.
pub trait DatabaseSession {
    type Unit: UnitOfWork;

    /// Settings of the role this session borrows.
    fn settings(&self) -> UnitSettings;

    /// Run caller-supplied work against one unit of work.
    ///
    /// The unit is opened with the role's settings and closed exactly once
    /// after `work` returns, fails or panics. This is the only way to run
    /// several statements against one unit of work.
    fn custom<T, F>(&self, work: F) -> impl Future<Output = DbResult<T>>
    where
        F: for<'u> FnOnce(&'u mut Self::Unit) -> BoxFuture<'u, DbResult<T>>;
}

/// Run `fut`, converting a panic into `DatabaseError::Unknown`.
pub(crate) async fn guarded<T, Fut>(method: &'static str, fut: Fut) -> DbResult<T>
where
    Fut: Future<Output = DbResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let panicked = Panicked::from_payload(payload);
            error!(method, panic = %panicked.message(), "Session call panicked");
            Err(DatabaseError::unknown(panicked))
        }
    }
}

/// Convert a caller parameter to JSON. `null` means "no parameter".
pub(crate) fn to_parameter<P>(statement: &str, parameter: &P) -> DbResult<Option<JsonValue>>
where
    P: Serialize + ?Sized,
{
    let value = serde_json::to_value(parameter)
        .map_err(|e| DatabaseError::invalid_parameter(statement, e))?;
    Ok(Some(value).filter(|v| !v.is_null()))
}

/// Build, validate and execute one operation inside the boundary.
pub(crate) async fn execute_guarded<C, K, P>(
    method: &'static str,
    connection: &C,
    kind: K,
    statement: &str,
    parameter: Option<&P>,
    bounds: Option<RowBounds>,
) -> DbResult<K::Output>
where
    C: DatabaseConnection,
    K: ResultKind,
    P: Serialize + ?Sized,
{
    guarded(method, async {
        let operation = Operation::new(kind, statement).with_bounds(bounds);
        operation.validate()?;
        let parameter = match parameter {
            Some(p) => to_parameter(statement, p)?,
            None => None,
        };
        operation.with_parameter(parameter).execute(connection).await
    })
    .await
}

/// Open a unit on `connection`, hand it to `work`, and release it.
pub(crate) async fn run_custom<C, T, F>(connection: &C, work: F) -> DbResult<T>
where
    C: DatabaseConnection,
    F: for<'u> FnOnce(&'u mut UnitOf<C>) -> BoxFuture<'u, DbResult<T>>,
{
    guarded("custom", async {
        let mut unit = connection.open_unit_of_work().await?;
        debug!(settings = ?connection.settings(), "Running custom work");
        let outcome = guarded("custom", work(&mut unit)).await;
        operation::release(unit, outcome, None).await
    })
    .await
}
