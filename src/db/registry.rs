//! Named statement registry.
//!
//! Statements are SQL templates with `#{path}` placeholders. A path names a
//! field of the statement parameter; dotted paths reach into nested objects.
//! Anything after a comma inside the braces (`#{id,jdbcType=INTEGER}`) is
//! ignored. Templates are split into SQL fragments and binding paths once, at
//! registration, and rendered per backend when executed.
//!
//! Every statement is classified with sqlparser so read-only units of work
//! can refuse statements that would write.

use crate::models::DatabaseType;
use serde::Deserialize;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Failure building a statement registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read mapper file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid mapper document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Statement '{name}' is registered more than once")]
    Duplicate { name: String },

    #[error("Statement id is empty in namespace '{namespace}'")]
    EmptyId { namespace: String },

    #[error("Statement '{name}' has an unterminated placeholder")]
    UnterminatedPlaceholder { name: String },

    #[error("Statement '{name}' has an empty placeholder")]
    EmptyPlaceholder { name: String },
}

/// What a statement does to the database, as far as the SQL parser can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    /// Only reads (SELECT, SHOW, EXPLAIN, ...).
    ReadOnly,
    /// At least one part writes.
    Write,
    /// The generic dialect cannot parse it; left to the database.
    Unclassified,
}

impl StatementClass {
    /// Classify rendered SQL.
    pub fn of(sql: &str) -> Self {
        let dialect = GenericDialect {};
        match Parser::parse_sql(&dialect, sql) {
            Ok(statements) if statements.is_empty() => Self::Unclassified,
            Ok(statements) => {
                if statements.iter().all(is_readonly_statement) {
                    Self::ReadOnly
                } else {
                    Self::Write
                }
            }
            Err(e) => {
                debug!(error = %e, "Statement not classified");
                Self::Unclassified
            }
        }
    }
}

fn is_readonly_statement(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Query(_)
            | Statement::Explain { .. }
            | Statement::ShowCreate { .. }
            | Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowDatabases { .. }
            | Statement::ShowSchemas { .. }
            | Statement::ShowFunctions { .. }
            | Statement::ShowVariable { .. }
            | Statement::ShowVariables { .. }
            | Statement::ShowStatus { .. }
            | Statement::ShowCollation { .. }
    )
}

/// A registered statement, split into SQL fragments and binding paths.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    name: String,
    /// Always one more fragment than bindings.
    fragments: Vec<String>,
    bindings: Vec<String>,
    class: StatementClass,
}

impl MappedStatement {
    pub fn parse(name: impl Into<String>, template: &str) -> Result<Self, RegistryError> {
        let name = name.into();
        let mut fragments = Vec::new();
        let mut bindings = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("#{") {
            fragments.push(rest[..start].to_string());
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| RegistryError::UnterminatedPlaceholder { name: name.clone() })?;
            let path = after[..end].split(',').next().unwrap_or_default().trim();
            if path.is_empty() {
                return Err(RegistryError::EmptyPlaceholder { name });
            }
            bindings.push(path.to_string());
            rest = &after[end + 1..];
        }
        fragments.push(rest.to_string());

        let mut statement = Self {
            name,
            fragments,
            bindings,
            class: StatementClass::Unclassified,
        };
        statement.class = StatementClass::of(&statement.render(DatabaseType::SQLite));
        Ok(statement)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter paths in placeholder order.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    pub fn class(&self) -> StatementClass {
        self.class
    }

    /// SQL with placeholders in the syntax of `db_type`.
    pub fn render(&self, db_type: DatabaseType) -> String {
        let mut sql = String::new();
        for (idx, fragment) in self.fragments.iter().enumerate() {
            if idx > 0 {
                sql.push_str(&db_type.placeholder(idx));
            }
            sql.push_str(fragment);
        }
        sql
    }
}

#[derive(Debug, Deserialize)]
struct MapperNamespace {
    #[serde(default)]
    namespace: String,
    statements: Vec<MapperStatement>,
}

#[derive(Debug, Deserialize)]
struct MapperStatement {
    id: String,
    sql: String,
}

/// Statements by fully-qualified name (`namespace.id`).
#[derive(Debug, Clone, Default)]
pub struct StatementRegistry {
    statements: HashMap<String, MappedStatement>,
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement under `name`.
    pub fn register(&mut self, name: &str, sql: &str) -> Result<(), RegistryError> {
        if self.statements.contains_key(name) {
            return Err(RegistryError::Duplicate {
                name: name.to_string(),
            });
        }
        let statement = MappedStatement::parse(name, sql)?;
        debug!(
            statement = %name,
            bindings = statement.bindings().len(),
            class = ?statement.class(),
            "Registered statement"
        );
        self.statements.insert(name.to_string(), statement);
        Ok(())
    }

    /// Builder form of `register`.
    pub fn with_statement(mut self, name: &str, sql: &str) -> Result<Self, RegistryError> {
        self.register(name, sql)?;
        Ok(self)
    }

    /// Build from a JSON mapper document:
    /// `[{"namespace": "users", "statements": [{"id": "find", "sql": "..."}]}]`.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let namespaces: Vec<MapperNamespace> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for ns in namespaces {
            for stmt in ns.statements {
                if stmt.id.trim().is_empty() {
                    return Err(RegistryError::EmptyId {
                        namespace: ns.namespace,
                    });
                }
                let name = if ns.namespace.is_empty() {
                    stmt.id
                } else {
                    format!("{}.{}", ns.namespace, stmt.id)
                };
                registry.register(&name, &stmt.sql)?;
            }
        }
        Ok(registry)
    }

    /// Load a JSON mapper document from `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            statements = registry.len(),
            "Loaded statement registry"
        );
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&MappedStatement> {
        self.statements.get(name)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.statements.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
