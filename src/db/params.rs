//! Parameter resolution and binding.
//!
//! A statement parameter is a JSON value. Object parameters are looked up by
//! each binding path of the statement; a scalar parameter satisfies a
//! statement with exactly one binding.

use crate::error::{ExecResult, ExecutorError};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// A value ready to be bound to a query placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays, objects and integers beyond i64.
    Json(JsonValue),
}

impl From<&JsonValue> for BindValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(*v),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Self::Int(v)
                } else if n.is_u64() {
                    Self::Json(value.clone())
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(v) => Self::String(v.clone()),
            other => Self::Json(other.clone()),
        }
    }
}

/// Resolve the values of `bindings` from `parameter`, in order.
pub fn resolve_bindings(
    statement: &str,
    bindings: &[String],
    parameter: Option<&JsonValue>,
) -> ExecResult<Vec<BindValue>> {
    if bindings.is_empty() {
        return Ok(Vec::new());
    }

    match parameter {
        None => Err(ExecutorError::binding(
            statement,
            &bindings[0],
            "statement requires a parameter",
        )),
        Some(object @ JsonValue::Object(_)) => bindings
            .iter()
            .map(|path| {
                lookup(object, path).map(BindValue::from).ok_or_else(|| {
                    ExecutorError::binding(statement, path, "no such field in parameter")
                })
            })
            .collect(),
        Some(scalar) if bindings.len() == 1 => Ok(vec![BindValue::from(scalar)]),
        Some(_) => Err(ExecutorError::binding(
            statement,
            &bindings[0],
            format!(
                "a scalar parameter cannot satisfy {} bindings",
                bindings.len()
            ),
        )),
    }
}

/// Follow a dotted path through nested objects.
fn lookup<'v>(value: &'v JsonValue, path: &str) -> Option<&'v JsonValue> {
    path.split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q BindValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(v) => query.bind(*v),
        BindValue::Int(v) => query.bind(*v),
        BindValue::Float(v) => query.bind(*v),
        BindValue::String(v) => query.bind(v.as_str()),
        BindValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q BindValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(v) => query.bind(*v),
        BindValue::Int(v) => query.bind(*v),
        BindValue::Float(v) => query.bind(*v),
        BindValue::String(v) => query.bind(v.as_str()),
        BindValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q BindValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(v) => query.bind(*v),
        BindValue::Int(v) => query.bind(*v),
        BindValue::Float(v) => query.bind(*v),
        BindValue::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        BindValue::Json(v) => query.bind(v.to_string()),
    }
}
