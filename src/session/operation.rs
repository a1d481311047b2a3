//! Single-use statement operations.
//!
//! An `Operation` carries one statement name, an optional parameter and
//! optional row bounds. It validates its inputs, dispatches to a unit of work
//! and coerces the raw result. What it returns is decided by its `ResultKind`:
//! - `SelectOne<T>`: at most one row, deserialized into `T`
//! - `SelectList<T>`: an ordered sequence of `T`
//! - `SelectMap<K, V>`: rows grouped by a key column
//! - `Handled<T, H>`: rows handed one at a time to a callback
//! - `AffectedRows`: the affected-row count of an insert, update or delete
//!
//! Rows are JSON objects. A row "matches" a result type when it deserializes
//! into it; a single-column row also matches a scalar type through its lone
//! column value.

use crate::error::{DatabaseError, DbResult, ExecResult};
use crate::models::{RowBounds, StatementCall};
use crate::session::connection::DatabaseConnection;
use crate::session::unit_of_work::UnitOfWork;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Call shape used to reach the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Statement name only.
    Bare,
    /// Statement name and parameter.
    Parameter,
    /// Statement name and bounds; the parameter slot stays empty.
    Bounds,
    /// Statement name, parameter and bounds.
    ParameterAndBounds,
}

impl Dispatch {
    pub fn of(has_parameter: bool, has_bounds: bool) -> Self {
        match (has_parameter, has_bounds) {
            (false, false) => Self::Bare,
            (true, false) => Self::Parameter,
            (false, true) => Self::Bounds,
            (true, true) => Self::ParameterAndBounds,
        }
    }

    /// Arguments handed to the unit of work for this shape.
    fn arguments<'a>(
        self,
        parameter: Option<&'a JsonValue>,
        bounds: Option<RowBounds>,
    ) -> (Option<&'a JsonValue>, Option<RowBounds>) {
        match self {
            Self::Bare => (None, None),
            Self::Parameter => (parameter, None),
            Self::Bounds => (None, bounds),
            Self::ParameterAndBounds => (parameter, bounds),
        }
    }
}

/// Arguments of one dispatch, already shaped.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub statement: &'a str,
    pub parameter: Option<&'a JsonValue>,
    pub bounds: Option<RowBounds>,
}

/// Result handling of an operation.
pub trait ResultKind {
    /// What the unit of work hands back.
    type Raw;
    /// What the caller receives.
    type Output;

    /// Unit-of-work call this kind dispatches to.
    fn call(&self) -> StatementCall;

    /// Run the shaped request against the unit of work.
    fn fetch<U: UnitOfWork>(
        call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> impl Future<Output = ExecResult<Self::Raw>>;

    /// Validate and convert the raw result.
    fn coerce(self, raw: Self::Raw) -> DbResult<Self::Output>;
}

/// At most one row.
pub struct SelectOne<T>(PhantomData<fn() -> T>);

impl<T> SelectOne<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SelectOne<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResultKind for SelectOne<T> {
    type Raw = Option<JsonValue>;
    type Output = Option<T>;

    fn call(&self) -> StatementCall {
        StatementCall::SelectOne
    }

    async fn fetch<U: UnitOfWork>(
        _call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> ExecResult<Option<JsonValue>> {
        unit.select_one(request.statement, request.parameter).await
    }

    fn coerce(self, raw: Option<JsonValue>) -> DbResult<Option<T>> {
        raw.map(coerce_row).transpose()
    }
}

/// An ordered sequence of rows.
pub struct SelectList<T>(PhantomData<fn() -> T>);

impl<T> SelectList<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SelectList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResultKind for SelectList<T> {
    type Raw = Vec<JsonValue>;
    type Output = Vec<T>;

    fn call(&self) -> StatementCall {
        StatementCall::SelectList
    }

    async fn fetch<U: UnitOfWork>(
        _call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> ExecResult<Vec<JsonValue>> {
        fetch_rows(unit, request).await
    }

    fn coerce(self, raw: Vec<JsonValue>) -> DbResult<Vec<T>> {
        raw.into_iter().map(coerce_row).collect()
    }
}

/// Rows grouped by the value of one column. Later rows overwrite earlier ones.
pub struct SelectMap<K, V> {
    key: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> SelectMap<K, V> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> ResultKind for SelectMap<K, V>
where
    K: DeserializeOwned + Eq + Hash,
    V: DeserializeOwned,
{
    type Raw = Vec<JsonValue>;
    type Output = HashMap<K, V>;

    fn call(&self) -> StatementCall {
        StatementCall::SelectList
    }

    async fn fetch<U: UnitOfWork>(
        _call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> ExecResult<Vec<JsonValue>> {
        fetch_rows(unit, request).await
    }

    fn coerce(self, raw: Vec<JsonValue>) -> DbResult<HashMap<K, V>> {
        let mut grouped = HashMap::with_capacity(raw.len());
        for row in raw {
            let key = row.get(&self.key).cloned().ok_or_else(|| {
                DatabaseError::shape_mismatch(serde_json::Error::custom(format!(
                    "row has no '{}' column",
                    self.key
                )))
            })?;
            let key: K = serde_json::from_value(key).map_err(DatabaseError::shape_mismatch)?;
            grouped.insert(key, coerce_row(row)?);
        }
        Ok(grouped)
    }
}

/// Rows delivered one at a time to a handler until it breaks.
pub struct Handled<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> Handled<T, H>
where
    H: FnMut(T) -> ControlFlow<()>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<T, H> ResultKind for Handled<T, H>
where
    T: DeserializeOwned,
    H: FnMut(T) -> ControlFlow<()>,
{
    type Raw = Vec<JsonValue>;
    /// Number of rows delivered.
    type Output = usize;

    fn call(&self) -> StatementCall {
        StatementCall::SelectList
    }

    async fn fetch<U: UnitOfWork>(
        _call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> ExecResult<Vec<JsonValue>> {
        fetch_rows(unit, request).await
    }

    fn coerce(mut self, raw: Vec<JsonValue>) -> DbResult<usize> {
        let mut delivered = 0;
        for row in raw {
            let value = coerce_row(row)?;
            delivered += 1;
            if (self.handler)(value).is_break() {
                break;
            }
        }
        Ok(delivered)
    }
}

/// Affected-row count of an insert, update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffectedRows(StatementCall);

impl AffectedRows {
    pub fn insert() -> Self {
        Self(StatementCall::Insert)
    }

    pub fn update() -> Self {
        Self(StatementCall::Update)
    }

    pub fn delete() -> Self {
        Self(StatementCall::Delete)
    }
}

impl ResultKind for AffectedRows {
    type Raw = u64;
    type Output = u64;

    fn call(&self) -> StatementCall {
        self.0
    }

    async fn fetch<U: UnitOfWork>(
        call: StatementCall,
        unit: &mut U,
        request: Request<'_>,
    ) -> ExecResult<u64> {
        match call {
            StatementCall::Insert => unit.insert(request.statement, request.parameter).await,
            StatementCall::Update => unit.update(request.statement, request.parameter).await,
            _ => unit.delete(request.statement, request.parameter).await,
        }
    }

    fn coerce(self, raw: u64) -> DbResult<u64> {
        Ok(raw)
    }
}

async fn fetch_rows<U: UnitOfWork>(unit: &mut U, request: Request<'_>) -> ExecResult<Vec<JsonValue>> {
    unit.select_list(request.statement, request.parameter, request.bounds)
        .await
}

/// Deserialize one row into `T`.
pub fn coerce_row<T: DeserializeOwned>(row: JsonValue) -> DbResult<T> {
    let lone_column = match &row {
        JsonValue::Object(columns) if columns.len() == 1 => columns.values().next().cloned(),
        _ => None,
    };

    match serde_json::from_value(row) {
        Ok(value) => Ok(value),
        Err(err) => match lone_column {
            Some(column) => {
                serde_json::from_value(column).map_err(|_| DatabaseError::shape_mismatch(err))
            }
            None => Err(DatabaseError::shape_mismatch(err)),
        },
    }
}

/// One validated request to run a named statement and coerce its result.
pub struct Operation<K> {
    statement: String,
    parameter: Option<JsonValue>,
    bounds: Option<RowBounds>,
    kind: K,
}

impl<K: ResultKind> Operation<K> {
    pub fn new(kind: K, statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameter: None,
            bounds: None,
            kind,
        }
    }

    /// Set the parameter. `None` and JSON `null` both mean "no parameter".
    pub fn with_parameter(mut self, parameter: Option<JsonValue>) -> Self {
        self.parameter = parameter.filter(|p| !p.is_null());
        self
    }

    /// Set row bounds. Ignored by kinds that do not select lists.
    pub fn with_bounds(mut self, bounds: Option<RowBounds>) -> Self {
        self.bounds = bounds.filter(|_| self.kind.call().accepts_bounds());
        self
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn parameter(&self) -> Option<&JsonValue> {
        self.parameter.as_ref()
    }

    pub fn bounds(&self) -> Option<RowBounds> {
        self.bounds
    }

    pub fn dispatch(&self) -> Dispatch {
        Dispatch::of(self.parameter.is_some(), self.bounds.is_some())
    }

    /// Fails with `InvalidStatement` when the statement name is empty.
    pub fn validate(&self) -> DbResult<()> {
        if self.statement.is_empty() {
            return Err(DatabaseError::invalid_statement(self.statement.clone()));
        }
        Ok(())
    }

    /// Validate, open a unit of work on `connection`, run, and release it.
    pub async fn execute<C: DatabaseConnection>(self, connection: &C) -> DbResult<K::Output> {
        self.validate()?;
        let mut unit = connection
            .open_unit_of_work()
            .await
            .map_err(|e| DatabaseError::execution(Some(self.statement.clone()), e))?;
        let statement = self.statement.clone();
        let outcome = self.perform(&mut unit).await;
        release(unit, outcome, Some(statement)).await
    }

    /// Validate and run against a unit of work the caller owns.
    pub async fn run_in<U: UnitOfWork>(self, unit: &mut U) -> DbResult<K::Output> {
        self.validate()?;
        self.perform(unit).await
    }

    async fn perform<U: UnitOfWork>(self, unit: &mut U) -> DbResult<K::Output> {
        let call = self.kind.call();
        let dispatch = self.dispatch();
        debug!(
            statement = %self.statement,
            call = %call,
            dispatch = ?dispatch,
            "Dispatching statement"
        );

        let (parameter, bounds) = dispatch.arguments(self.parameter.as_ref(), self.bounds);
        let request = Request {
            statement: &self.statement,
            parameter,
            bounds,
        };
        let raw = K::fetch(call, unit, request)
            .await
            .map_err(|e| DatabaseError::execution(Some(self.statement.clone()), e))?;

        self.kind.coerce(raw)
    }
}

/// Close `unit`, then surface `outcome`.
///
/// A close failure is reported only when the outcome itself succeeded. It is
/// attributed to `statement`, where batched writes flushed on close fail.
pub(crate) async fn release<U: UnitOfWork, T>(
    unit: U,
    outcome: DbResult<T>,
    statement: Option<String>,
) -> DbResult<T> {
    let closed = unit.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(DatabaseError::execution(statement, e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "Failed to release unit of work after error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[test]
    fn test_dispatch_table() {
        assert_eq!(Dispatch::of(false, false), Dispatch::Bare);
        assert_eq!(Dispatch::of(true, false), Dispatch::Parameter);
        assert_eq!(Dispatch::of(false, true), Dispatch::Bounds);
        assert_eq!(Dispatch::of(true, true), Dispatch::ParameterAndBounds);
    }

    #[test]
    fn test_bounds_only_leaves_parameter_slot_empty() {
        let param = json!({"id": 1});
        let bounds = Some(RowBounds::limit(5));
        assert_eq!(Dispatch::Bounds.arguments(Some(&param), bounds), (None, bounds));
        assert_eq!(Dispatch::Bare.arguments(Some(&param), bounds), (None, None));
        assert_eq!(
            Dispatch::ParameterAndBounds.arguments(Some(&param), bounds),
            (Some(&param), bounds)
        );
    }

    #[test]
    fn test_null_parameter_is_absent() {
        let op = Operation::new(SelectOne::<User>::new(), "users.find")
            .with_parameter(Some(JsonValue::Null));
        assert!(op.parameter().is_none());
        assert_eq!(op.dispatch(), Dispatch::Bare);
    }

    #[test]
    fn test_bounds_ignored_for_non_list_kinds() {
        let op = Operation::new(AffectedRows::update(), "users.rename")
            .with_bounds(Some(RowBounds::limit(1)));
        assert!(op.bounds().is_none());

        let op = Operation::new(SelectList::<User>::new(), "users.all")
            .with_bounds(Some(RowBounds::limit(1)));
        assert_eq!(op.dispatch(), Dispatch::Bounds);
    }

    #[test]
    fn test_empty_statement_fails_validation() {
        let err = Operation::new(AffectedRows::insert(), "")
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatement);
    }

    #[test]
    fn test_select_one_coercion() {
        let kind = SelectOne::<User>::new();
        assert_eq!(kind.coerce(None).unwrap(), None);

        let user = SelectOne::<User>::new()
            .coerce(Some(json!({"id": 1, "name": "ada"})))
            .unwrap();
        assert_eq!(
            user,
            Some(User {
                id: 1,
                name: "ada".to_string()
            })
        );
    }

    #[test]
    fn test_select_one_shape_mismatch() {
        let err = SelectOne::<User>::new()
            .coerce(Some(json!({"id": "not a number", "name": "ada"})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultShapeMismatch);
        assert_eq!(err.statement(), None);
    }

    #[test]
    fn test_single_column_row_matches_scalar() {
        let count: i64 = coerce_row(json!({"count": 3})).unwrap();
        assert_eq!(count, 3);
        let err = coerce_row::<i64>(json!({"a": 1, "b": 2})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultShapeMismatch);
    }

    #[test]
    fn test_select_list_empty_is_empty_sequence() {
        let rows = SelectList::<User>::new().coerce(Vec::new()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_select_list_first_row_mismatch() {
        let err = SelectList::<User>::new()
            .coerce(vec![json!({"unexpected": true})])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultShapeMismatch);
    }

    #[test]
    fn test_select_map_groups_by_key() {
        let map: HashMap<i64, User> = SelectMap::new("id")
            .coerce(vec![
                json!({"id": 1, "name": "ada"}),
                json!({"id": 2, "name": "bob"}),
                json!({"id": 1, "name": "ada lovelace"}),
            ])
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1].name, "ada lovelace");
        assert_eq!(map[&2].name, "bob");
    }

    #[test]
    fn test_select_map_missing_key_column() {
        let err = SelectMap::<i64, User>::new("uid")
            .coerce(vec![json!({"id": 1, "name": "ada"})])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultShapeMismatch);
    }

    #[test]
    fn test_handler_stops_on_break() {
        let mut seen = Vec::new();
        let delivered = Handled::new(|user: User| {
            seen.push(user.id);
            if user.id == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .coerce(vec![
            json!({"id": 1, "name": "a"}),
            json!({"id": 2, "name": "b"}),
            json!({"id": 3, "name": "c"}),
        ])
        .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_affected_rows_passes_count_through() {
        assert_eq!(AffectedRows::delete().coerce(7).unwrap(), 7);
        assert_eq!(AffectedRows::insert().call(), StatementCall::Insert);
    }
}
