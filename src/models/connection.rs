//! Connection-related data models.
//!
//! This module defines the database backends and the settings a unit of work
//! is opened with.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Render the bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", index),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How repeated statement executions within one unit of work are handled.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Every statement is prepared and discarded.
    #[default]
    Simple,
    /// Prepared statements are cached on the connection and reused.
    Reuse,
    /// Writes are queued and executed together on flush.
    Batch,
}

impl ExecutionStrategy {
    /// Whether prepared statements should be kept in the connection cache.
    pub fn caches_statements(&self) -> bool {
        !matches!(self, Self::Simple)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch)
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Reuse => write!(f, "reuse"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Settings a unit of work is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitSettings {
    pub read_only: bool,
    pub auto_commit: bool,
    pub strategy: ExecutionStrategy,
}

impl UnitSettings {
    /// Settings of every read unit of work.
    pub const READ: Self = Self {
        read_only: true,
        auto_commit: true,
        strategy: ExecutionStrategy::Simple,
    };

    /// Default settings of a write unit of work.
    pub const WRITE: Self = Self {
        read_only: false,
        auto_commit: true,
        strategy: ExecutionStrategy::Simple,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgres://u:p@h/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mariadb://h/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite:data.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_connection_string("oracle://h"), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DatabaseType::PostgreSQL.placeholder(2), "$2");
        assert_eq!(DatabaseType::MySQL.placeholder(2), "?");
        assert_eq!(DatabaseType::SQLite.placeholder(1), "?");
    }

    #[test]
    fn test_strategy_statement_cache() {
        assert!(!ExecutionStrategy::Simple.caches_statements());
        assert!(ExecutionStrategy::Reuse.caches_statements());
        assert!(ExecutionStrategy::Batch.caches_statements());
        assert!(ExecutionStrategy::Batch.is_batch());
    }

    #[test]
    fn test_role_settings() {
        assert!(UnitSettings::READ.read_only);
        assert!(UnitSettings::READ.auto_commit);
        assert!(!UnitSettings::WRITE.read_only);
        assert_eq!(UnitSettings::WRITE.strategy, ExecutionStrategy::Simple);
    }
}
