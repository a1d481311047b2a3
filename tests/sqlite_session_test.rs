use db_session::config::DataSourceConfig;
use db_session::db::{DbPool, SqlxExecutor, StatementRegistry};
use db_session::models::ExecutionStrategy;
use db_session::{
    DatabaseConnection, DatabaseError, DatabaseSession, ErrorKind, ExecutorError, ReadConnection,
    UnitOfWork, WriteConnection,
};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

const MAPPER: &str = r#"[
  {
    "namespace": "users",
    "statements": [
      {"id": "create", "sql": "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)"},
      {"id": "insert", "sql": "INSERT INTO users (name, score) VALUES (#{name}, #{score})"},
      {"id": "rename", "sql": "UPDATE users SET name = #{name} WHERE id = #{id}"},
      {"id": "delete", "sql": "DELETE FROM users WHERE id = #{id}"},
      {"id": "by_id", "sql": "SELECT id, name, score FROM users WHERE id = #{id}"},
      {"id": "all", "sql": "SELECT id, name, score FROM users ORDER BY id"},
      {"id": "count", "sql": "SELECT COUNT(*) AS n FROM users"}
    ]
  }
]"#;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: i64,
    name: String,
    score: Option<f64>,
}

#[derive(Debug, Serialize)]
struct NewUser<'a> {
    name: &'a str,
    score: Option<f64>,
}

struct Fixture {
    _dir: TempDir,
    write_pool: DbPool,
    read_pool: DbPool,
    registry: Arc<StatementRegistry>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mapper = dir.path().join("users.json");
        std::fs::write(&mapper, MAPPER).unwrap();
        let registry = Arc::new(StatementRegistry::from_path(&mapper).unwrap());

        let url = format!("sqlite:{}", dir.path().join("app.db").display());
        let data_source = DataSourceConfig::parse(&url).unwrap();
        let write_pool = DbPool::connect(&data_source).await.unwrap();

        let fixture_write = WriteConnection::new(SqlxExecutor::new(
            write_pool.clone(),
            Arc::clone(&registry),
        ));
        fixture_write.session().update("users.create").await.unwrap();

        let read_pool = DbPool::connect(&data_source.as_read_only()).await.unwrap();
        Self {
            _dir: dir,
            write_pool,
            read_pool,
            registry,
        }
    }

    fn write(&self) -> WriteConnection<SqlxExecutor> {
        WriteConnection::new(SqlxExecutor::new(
            self.write_pool.clone(),
            Arc::clone(&self.registry),
        ))
    }

    fn read(&self) -> ReadConnection<SqlxExecutor> {
        ReadConnection::new(SqlxExecutor::new(
            self.read_pool.clone(),
            Arc::clone(&self.registry),
        ))
    }

    async fn close(self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }
}

#[tokio::test]
async fn test_insert_then_select() {
    let fixture = Fixture::new().await;
    let write = fixture.write();
    let writer = write.session();

    let inserted = writer
        .insert_with("users.insert", &NewUser { name: "ann", score: Some(4.5) })
        .await
        .unwrap();
    assert_eq!(inserted, 1);
    writer
        .insert_with("users.insert", &NewUser { name: "bob", score: None })
        .await
        .unwrap();

    let read = fixture.read();
    let reader = read.session();

    let ann: Option<User> = reader
        .select_one_with("users.by_id", &json!({"id": 1}))
        .await
        .unwrap();
    assert_eq!(
        ann,
        Some(User {
            id: 1,
            name: "ann".to_string(),
            score: Some(4.5)
        })
    );

    let missing: Option<User> = reader.select_one_with("users.by_id", &99).await.unwrap();
    assert!(missing.is_none());

    let all: Vec<User> = reader.select_list("users.all").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].name, "bob");
    assert_eq!(all[1].score, None);

    let count: Option<i64> = reader.select_one("users.count").await.unwrap();
    assert_eq!(count, Some(2));

    fixture.close().await;
}

#[tokio::test]
async fn test_update_and_delete_report_affected_rows() {
    let fixture = Fixture::new().await;
    let write = fixture.write();
    let writer = write.session();
    for name in ["a", "b", "c"] {
        writer
            .insert_with("users.insert", &NewUser { name, score: None })
            .await
            .unwrap();
    }

    let renamed = writer
        .update_with("users.rename", &json!({"id": 2, "name": "bee"}))
        .await
        .unwrap();
    assert_eq!(renamed, 1);
    let none = writer
        .update_with("users.rename", &json!({"id": 42, "name": "nobody"}))
        .await
        .unwrap();
    assert_eq!(none, 0);
    assert_eq!(writer.delete_with("users.delete", &3).await.unwrap(), 1);

    let read = fixture.read();
    let names: Vec<String> = read
        .session()
        .select_list::<User>("users.all")
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, ["a", "bee"]);

    fixture.close().await;
}

#[tokio::test]
async fn test_bounds_map_and_handler() {
    let fixture = Fixture::new().await;
    let write = fixture.write();
    for name in ["a", "b", "c", "d", "e"] {
        write
            .session()
            .insert_with("users.insert", &NewUser { name, score: None })
            .await
            .unwrap();
    }

    let read = fixture.read();
    let reader = read.session();

    let page: Vec<User> = reader
        .select_list_bounded("users.all", db_session::models::RowBounds::new(1, 2))
        .await
        .unwrap();
    assert_eq!(page.iter().map(|u| u.id).collect::<Vec<_>>(), [2, 3]);

    let by_name: HashMap<String, User> = reader
        .select_map("users.all", &(), "name", None)
        .await
        .unwrap();
    assert_eq!(by_name.len(), 5);
    assert_eq!(by_name["d"].id, 4);

    let mut ids = Vec::new();
    let delivered = reader
        .select_with_handler("users.all", &(), None, |user: User| {
            ids.push(user.id);
            if ids.len() == 3 {
                std::ops::ControlFlow::Break(())
            } else {
                std::ops::ControlFlow::Continue(())
            }
        })
        .await
        .unwrap();
    assert_eq!(delivered, 3);
    assert_eq!(ids, [1, 2, 3]);

    fixture.close().await;
}

#[tokio::test]
async fn test_custom_commit_and_rollback() {
    let fixture = Fixture::new().await;
    let write = fixture.write().with_auto_commit(false);
    let session = write.session();

    let committed = session
        .custom(|unit| {
            async move {
                let a = unit
                    .insert("users.insert", Some(&json!({"name": "kept", "score": 1.0})))
                    .await?;
                let b = unit
                    .update("users.rename", Some(&json!({"id": 1, "name": "kept2"})))
                    .await?;
                unit.commit().await?;
                Ok::<_, DatabaseError>(a + b)
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(committed, 2);

    session
        .custom(|unit| {
            async move {
                unit.insert("users.insert", Some(&json!({"name": "gone", "score": null})))
                    .await?;
                unit.rollback().await?;
                Ok::<_, DatabaseError>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    // Closing without commit discards the work too
    session
        .custom(|unit| {
            async move {
                unit.insert("users.insert", Some(&json!({"name": "dropped", "score": null})))
                    .await?;
                Ok::<_, DatabaseError>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    let read = fixture.read();
    let all: Vec<User> = read.session().select_list("users.all").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "kept2");

    fixture.close().await;
}

#[tokio::test]
async fn test_manual_commit_typed_write_is_rejected() {
    let fixture = Fixture::new().await;
    let write = fixture.write().with_auto_commit(false);
    let err = write
        .session()
        .insert_with("users.insert", &NewUser { name: "x", score: None })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAutoCommit);
    fixture.close().await;
}

#[tokio::test]
async fn test_batch_strategy_flushes_on_close() {
    let fixture = Fixture::new().await;
    let write = fixture
        .write()
        .with_execution_strategy(ExecutionStrategy::Batch);

    // Queued statements report no affected rows until flushed
    let queued = write
        .session()
        .insert_with("users.insert", &NewUser { name: "late", score: None })
        .await
        .unwrap();
    assert_eq!(queued, 0);

    let flushed = write
        .session()
        .custom(|unit| {
            async move {
                unit.insert("users.insert", Some(&json!({"name": "a", "score": null})))
                    .await?;
                unit.insert("users.insert", Some(&json!({"name": "b", "score": null})))
                    .await?;
                Ok::<_, DatabaseError>(unit.flush_statements().await?)
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(flushed, vec![1, 1]);

    let read = fixture.read();
    let count: Option<i64> = read.session().select_one("users.count").await.unwrap();
    assert_eq!(count, Some(3));

    fixture.close().await;
}

#[tokio::test]
async fn test_read_session_cannot_write() {
    let fixture = Fixture::new().await;
    let read = fixture.read();
    let reader = read.session();

    let err = reader.select_list::<User>("users.create").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    assert_eq!(err.statement(), Some("users.create"));
    assert!(matches!(
        err.executor_error(),
        Some(ExecutorError::ReadOnlyViolation { .. })
    ));

    let err = reader
        .custom(|unit| {
            async move {
                Ok::<_, DatabaseError>(
                    unit.insert("users.insert", Some(&json!({"name": "x", "score": null})))
                        .await?,
                )
            }
            .boxed()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    assert!(matches!(
        err.executor_error(),
        Some(ExecutorError::ReadOnlyViolation { .. })
    ));

    fixture.close().await;
}

#[tokio::test]
async fn test_executor_failures_are_execution_failures() {
    let fixture = Fixture::new().await;
    let write = fixture.write();
    let writer = write.session();
    writer
        .insert_with("users.insert", &NewUser { name: "a", score: None })
        .await
        .unwrap();
    writer
        .insert_with("users.insert", &NewUser { name: "b", score: None })
        .await
        .unwrap();

    let read = fixture.read();
    let reader = read.session();

    let err = reader.select_one::<User>("users.nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    assert!(matches!(
        err.executor_error(),
        Some(ExecutorError::UnknownStatement { .. })
    ));

    let err = reader.select_one::<User>("users.all").await.unwrap_err();
    assert!(matches!(
        err.executor_error(),
        Some(ExecutorError::TooManyRows { .. })
    ));

    // NOT NULL constraint
    let err = writer
        .insert_with("users.insert", &json!({"name": null, "score": 1.0}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    assert_eq!(err.statement(), Some("users.insert"));
    assert!(matches!(err.executor_error(), Some(ExecutorError::Sql(_))));

    fixture.close().await;
}

#[tokio::test]
async fn test_batch_failure_on_close_names_statement() {
    let fixture = Fixture::new().await;
    let write = fixture.write();
    write
        .session()
        .insert_with("users.insert", &NewUser { name: "a", score: None })
        .await
        .unwrap();

    let batch = fixture
        .write()
        .with_execution_strategy(ExecutionStrategy::Batch);
    // NOT NULL constraint, hit when the queued update is flushed on close
    let err = batch
        .session()
        .update_with("users.rename", &json!({"id": 1, "name": null}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    assert_eq!(err.statement(), Some("users.rename"));
    assert!(matches!(err.executor_error(), Some(ExecutorError::Sql(_))));

    fixture.close().await;
}
