//! DB Session Library
//!
//! A data-access layer that runs named, parameterized SQL statements through
//! read-only and read-write connection roles (SQLite, PostgreSQL, MySQL),
//! normalizing every failure into one error type.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod session;

pub use config::Config;
pub use error::{DatabaseError, DbResult, ErrorKind, ExecutorError};
pub use session::{
    DatabaseConnection, DatabaseSession, ReadConnection, ReadSession, StatementExecutor,
    UnitOfWork, WriteConnection, WriteSession,
};
