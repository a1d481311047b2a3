//! Error types for the session layer.
//!
//! Two levels of error exist:
//! - `ExecutorError` is raised by statement executors and their units of work.
//! - `DatabaseError` is the only error a session ever returns. Executor failures,
//!   result shape mismatches and anything uncategorized are normalized into it at
//!   the session boundary.

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the chained cause of uncategorized failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised by a statement executor or one of its units of work.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout { operation: String, elapsed_secs: u64 },

    #[error("Statement not registered: {statement}")]
    UnknownStatement { statement: String },

    #[error("Statement '{statement}' is not allowed on a read-only unit of work")]
    ReadOnlyViolation { statement: String },

    #[error("Cannot bind '{binding}' for statement '{statement}': {reason}")]
    Binding {
        statement: String,
        binding: String,
        reason: String,
    },

    #[error("Statement '{statement}' returned more than one row")]
    TooManyRows { statement: String },

    #[error("Unit of work has already been released")]
    Released,

    #[error("{message}")]
    Backend { message: String },
}

impl ExecutorError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: elapsed.as_secs(),
        }
    }

    pub fn unknown_statement(statement: impl Into<String>) -> Self {
        Self::UnknownStatement {
            statement: statement.into(),
        }
    }

    pub fn read_only_violation(statement: impl Into<String>) -> Self {
        Self::ReadOnlyViolation {
            statement: statement.into(),
        }
    }

    /// Create a parameter binding error.
    pub fn binding(
        statement: impl Into<String>,
        binding: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Binding {
            statement: statement.into(),
            binding: binding.into(),
            reason: reason.into(),
        }
    }

    pub fn too_many_rows(statement: impl Into<String>) -> Self {
        Self::TooManyRows {
            statement: statement.into(),
        }
    }

    /// Create a backend error for executors not built on sqlx.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Sql(sqlx::Error::PoolTimedOut)
        )
    }
}

/// Category of a `DatabaseError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty statement name, caught before any I/O.
    InvalidStatement,
    /// Mutating call on a write session configured for manual commit.
    NotAutoCommit,
    /// The executor failed while running a statement.
    ExecutionFailure,
    /// Returned rows do not deserialize into the requested type.
    ResultShapeMismatch,
    /// The parameter could not be converted to a bindable value.
    InvalidParameter,
    /// The session method is declared but not supported.
    NotSupported,
    /// Anything else, caught at the session boundary.
    UnknownFailure,
}

/// The single error type surfaced by sessions.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Invalid statement provided")]
    InvalidStatement { statement: String },

    #[error("Unable to execute, not autocommit")]
    NotAutoCommit,

    #[error("Unable to execute query")]
    Execution {
        statement: Option<String>,
        #[source]
        source: ExecutorError,
    },

    #[error("Raw result and result class don't match")]
    ResultShapeMismatch {
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid parameter provided")]
    InvalidParameter {
        statement: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Operation not supported: {operation}")]
    NotSupported { operation: &'static str },

    #[error("Unknown exception type")]
    Unknown {
        #[source]
        source: BoxError,
    },
}

impl DatabaseError {
    pub fn invalid_statement(statement: impl Into<String>) -> Self {
        Self::InvalidStatement {
            statement: statement.into(),
        }
    }

    /// Create an execution failure, chaining the executor error as cause.
    pub fn execution(statement: Option<String>, source: ExecutorError) -> Self {
        Self::Execution { statement, source }
    }

    pub fn shape_mismatch(source: serde_json::Error) -> Self {
        Self::ResultShapeMismatch { source }
    }

    pub fn invalid_parameter(statement: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidParameter {
            statement: statement.into(),
            source,
        }
    }

    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    /// Wrap an uncategorized failure.
    pub fn unknown(source: impl Into<BoxError>) -> Self {
        Self::Unknown {
            source: source.into(),
        }
    }

    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStatement { .. } => ErrorKind::InvalidStatement,
            Self::NotAutoCommit => ErrorKind::NotAutoCommit,
            Self::Execution { .. } => ErrorKind::ExecutionFailure,
            Self::ResultShapeMismatch { .. } => ErrorKind::ResultShapeMismatch,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::Unknown { .. } => ErrorKind::UnknownFailure,
        }
    }

    /// Human-readable message, without the cause.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Statement name attached to this error, if any.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::InvalidStatement { statement } | Self::InvalidParameter { statement, .. } => {
                Some(statement)
            }
            Self::Execution { statement, .. } => statement.as_deref(),
            _ => None,
        }
    }

    /// Underlying executor error, when this is an execution failure.
    pub fn executor_error(&self) -> Option<&ExecutorError> {
        match self {
            Self::Execution { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Executor failures crossing into a session without a statement in scope
/// (opening or releasing a unit of work, custom work).
impl From<ExecutorError> for DatabaseError {
    fn from(err: ExecutorError) -> Self {
        DatabaseError::execution(None, err)
    }
}

/// A panic captured at the session boundary.
#[derive(Error, Debug)]
#[error("panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    /// Build from a payload returned by `catch_unwind`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type alias for session operations.
pub type DbResult<T> = Result<T, DatabaseError>;

/// Result type alias for executor operations.
pub type ExecResult<T> = Result<T, ExecutorError>;
