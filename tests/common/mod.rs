//! Scripted statement executor that records how sessions drive it.

#![allow(dead_code)]

use db_session::error::{ExecResult, ExecutorError};
use db_session::models::{RowBounds, UnitSettings};
use db_session::{StatementExecutor, UnitOfWork};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Response handed back by the next unit-of-work call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Row(Option<JsonValue>),
    Rows(Vec<JsonValue>),
    Count(u64),
    Fail(String),
    Panic(&'static str),
}

/// One call a unit of work received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub unit: usize,
    pub method: &'static str,
    pub statement: String,
    pub parameter: Option<JsonValue>,
    pub bounds: Option<RowBounds>,
}

#[derive(Debug, Default, Clone)]
pub struct SpyLog {
    pub opened: Vec<UnitSettings>,
    pub closed: Vec<usize>,
    pub dropped_unclosed: Vec<usize>,
    pub calls: Vec<RecordedCall>,
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<SpyLog>,
    script: Mutex<VecDeque<Scripted>>,
}

#[derive(Debug, Clone, Default)]
pub struct SpyExecutor {
    shared: Arc<Shared>,
    fail_open: bool,
    fail_close: bool,
}

impl SpyExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next unit-of-work call.
    pub fn respond(self, response: Scripted) -> Self {
        self.shared.script.lock().unwrap().push_back(response);
        self
    }

    /// Make every `open` fail.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make every `close` fail after recording the close.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn log(&self) -> SpyLog {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.shared.log.lock().unwrap().opened.len()
    }

    pub fn close_count(&self) -> usize {
        self.shared.log.lock().unwrap().closed.len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared.log.lock().unwrap().calls.clone()
    }
}

impl StatementExecutor for SpyExecutor {
    type Unit = SpyUnit;

    async fn open(&self, settings: UnitSettings) -> ExecResult<SpyUnit> {
        if self.fail_open {
            return Err(ExecutorError::connection(
                "pool exhausted",
                "Raise max_connections",
            ));
        }
        let mut log = self.shared.log.lock().unwrap();
        log.opened.push(settings);
        Ok(SpyUnit {
            id: log.opened.len(),
            shared: Arc::clone(&self.shared),
            closed: false,
            fail_close: self.fail_close,
        })
    }
}

#[derive(Debug)]
pub struct SpyUnit {
    id: usize,
    shared: Arc<Shared>,
    closed: bool,
    fail_close: bool,
}

impl SpyUnit {
    pub fn id(&self) -> usize {
        self.id
    }

    fn record(
        &self,
        method: &'static str,
        statement: &str,
        parameter: Option<&JsonValue>,
        bounds: Option<RowBounds>,
    ) -> Option<Scripted> {
        self.shared.log.lock().unwrap().calls.push(RecordedCall {
            unit: self.id,
            method,
            statement: statement.to_string(),
            parameter: parameter.cloned(),
            bounds,
        });
        let next = self.shared.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Panic(message)) => panic!("{message}"),
            other => other,
        }
    }

    fn count(&self, method: &'static str, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        match self.record(method, statement, parameter, None) {
            Some(Scripted::Count(n)) => Ok(n),
            Some(Scripted::Fail(message)) => Err(ExecutorError::backend(message)),
            _ => Ok(0),
        }
    }
}

impl UnitOfWork for SpyUnit {
    async fn select_one(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
    ) -> ExecResult<Option<JsonValue>> {
        match self.record("select_one", statement, parameter, None) {
            Some(Scripted::Row(row)) => Ok(row),
            Some(Scripted::Fail(message)) => Err(ExecutorError::backend(message)),
            _ => Ok(None),
        }
    }

    async fn select_list(
        &mut self,
        statement: &str,
        parameter: Option<&JsonValue>,
        bounds: Option<RowBounds>,
    ) -> ExecResult<Vec<JsonValue>> {
        match self.record("select_list", statement, parameter, bounds) {
            Some(Scripted::Rows(rows)) => Ok(rows),
            Some(Scripted::Fail(message)) => Err(ExecutorError::backend(message)),
            _ => Ok(Vec::new()),
        }
    }

    async fn insert(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.count("insert", statement, parameter)
    }

    async fn update(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.count("update", statement, parameter)
    }

    async fn delete(&mut self, statement: &str, parameter: Option<&JsonValue>) -> ExecResult<u64> {
        self.count("delete", statement, parameter)
    }

    async fn flush_statements(&mut self) -> ExecResult<Vec<u64>> {
        Ok(Vec::new())
    }

    async fn commit(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn close(mut self) -> ExecResult<()> {
        self.closed = true;
        self.shared.log.lock().unwrap().closed.push(self.id);
        if self.fail_close {
            return Err(ExecutorError::backend("flush on close failed"));
        }
        Ok(())
    }
}

impl Drop for SpyUnit {
    fn drop(&mut self) {
        if !self.closed {
            if let Ok(mut log) = self.shared.log.lock() {
                log.dropped_unclosed.push(self.id);
            }
        }
    }
}
