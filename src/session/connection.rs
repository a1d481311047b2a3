//! Connection roles.
//!
//! A role describes how units of work are opened: read-only flag, auto-commit
//! flag and execution strategy. `ReadConnection` is fixed at construction.
//! `WriteConnection` is configured with consuming builder calls before it is
//! shared, so neither role can change once sessions borrow it.

use crate::error::ExecResult;
use crate::models::{ExecutionStrategy, UnitSettings};
use crate::session::read::ReadSession;
use crate::session::unit_of_work::StatementExecutor;
use crate::session::write::WriteSession;
use crate::session::DatabaseSession;
use std::future::Future;

/// Unit-of-work type opened by a connection role.
pub type UnitOf<C> = <<C as DatabaseConnection>::Executor as StatementExecutor>::Unit;

/// Capability shared by the read and write roles.
pub trait DatabaseConnection: Send + Sync {
    type Executor: StatementExecutor;
    type Session<'c>: DatabaseSession
    where
        Self: 'c;

    /// The executor this role opens units of work with.
    fn executor(&self) -> &Self::Executor;

    fn is_read_only(&self) -> bool;

    fn is_auto_commit(&self) -> bool;

    fn execution_strategy(&self) -> ExecutionStrategy;

    /// Settings every unit of work opened by this role receives.
    fn settings(&self) -> UnitSettings {
        UnitSettings {
            read_only: self.is_read_only(),
            auto_commit: self.is_auto_commit(),
            strategy: self.execution_strategy(),
        }
    }

    /// Open a unit of work with this role's settings. The caller must close it.
    fn open_unit_of_work(&self) -> impl Future<Output = ExecResult<UnitOf<Self>>> + Send {
        self.executor().open(self.settings())
    }

    /// Session façade borrowing this role.
    fn session(&self) -> Self::Session<'_>;
}

/// Read role: always read-only, auto-commit, simple execution.
#[derive(Debug, Clone)]
pub struct ReadConnection<E> {
    executor: E,
}

impl<E> ReadConnection<E> {
    pub const READ_ONLY: bool = true;
    pub const AUTO_COMMIT: bool = true;
    pub const EXECUTION_STRATEGY: ExecutionStrategy = ExecutionStrategy::Simple;

    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: StatementExecutor> DatabaseConnection for ReadConnection<E> {
    type Executor = E;
    type Session<'c>
        = ReadSession<'c, E>
    where
        Self: 'c;

    fn executor(&self) -> &E {
        &self.executor
    }

    fn is_read_only(&self) -> bool {
        Self::READ_ONLY
    }

    fn is_auto_commit(&self) -> bool {
        Self::AUTO_COMMIT
    }

    fn execution_strategy(&self) -> ExecutionStrategy {
        Self::EXECUTION_STRATEGY
    }

    fn session(&self) -> ReadSession<'_, E> {
        ReadSession::new(self)
    }
}

/// Write role: never read-only; auto-commit and strategy are configurable
/// until the role is shared.
#[derive(Debug, Clone)]
pub struct WriteConnection<E> {
    executor: E,
    auto_commit: bool,
    strategy: ExecutionStrategy,
}

impl<E> WriteConnection<E> {
    /// Create a write role with auto-commit on and simple execution.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            auto_commit: UnitSettings::WRITE.auto_commit,
            strategy: UnitSettings::WRITE.strategy,
        }
    }

    /// Set the auto-commit flag.
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Set the execution strategy.
    pub fn with_execution_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl<E: StatementExecutor> DatabaseConnection for WriteConnection<E> {
    type Executor = E;
    type Session<'c>
        = WriteSession<'c, E>
    where
        Self: 'c;

    fn executor(&self) -> &E {
        &self.executor
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn execution_strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    fn session(&self) -> WriteSession<'_, E> {
        WriteSession::new(self)
    }
}
