//! Data models shared by sessions and executors.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod statement;

// Re-export commonly used types
pub use connection::{DatabaseType, ExecutionStrategy, UnitSettings};
pub use statement::{NO_ROW_LIMIT, NO_ROW_OFFSET, RowBounds, StatementCall};
