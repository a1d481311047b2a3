//! Database layer: the sqlx implementation of the statement executor.
//!
//! This module provides:
//! - Connection pool creation per backend
//! - A registry of named statements
//! - Parameter resolution and binding
//! - Row decoding into JSON objects
//! - Units of work over pooled connections and transactions

pub mod executor;
pub(crate) mod macros;
pub mod params;
pub mod pool;
pub mod registry;
pub mod types;

pub use executor::{SqlxExecutor, SqlxUnitOfWork};
pub use params::BindValue;
pub use pool::DbPool;
pub use registry::{MappedStatement, RegistryError, StatementClass, StatementRegistry};
pub use types::{RowToJson, TypeCategory};
