//! db-session - Main entry point.
//!
//! Runs one named statement through a read or write session and prints the
//! result as JSON on stdout. Logs go to stderr.

use db_session::config::{Command, Config};
use db_session::db::{DbPool, SqlxExecutor, StatementRegistry};
use db_session::error::DatabaseError;
use db_session::{DatabaseConnection, ReadConnection, WriteConnection};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Value of the `select-map` key column.
#[derive(Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
enum MapKey {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl std::fmt::Display for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapKey::Int(v) => write!(f, "{v}"),
            MapKey::Bool(v) => write!(f, "{v}"),
            MapKey::Text(v) => f.write_str(v),
        }
    }
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Print an error and its cause chain.
fn report(err: &dyn std::error::Error) {
    eprintln!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse_args();
    init_tracing(&config);

    match run(&config).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e, "Command failed");
            report(e.as_ref());
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<JsonValue, Box<dyn std::error::Error>> {
    let registry = Arc::new(StatementRegistry::from_path(&config.statements)?);
    let data_source = config.data_source()?;

    info!(
        statements = registry.len(),
        db_type = %data_source.db_type,
        "Starting db-session v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Read commands get a pool whose connections refuse writes
    let data_source = if config.command.is_write() {
        data_source
    } else {
        data_source.as_read_only()
    };
    let pool = DbPool::connect(&data_source).await?;
    let executor = SqlxExecutor::new(pool.clone(), registry)
        .with_statement_timeout(config.statement_timeout_duration());

    let result = run_command(executor, config).await;
    pool.close().await;
    Ok(result?)
}

/// Run the command on the role it needs.
async fn run_command(executor: SqlxExecutor, config: &Config) -> Result<JsonValue, DatabaseError> {
    let read = ReadConnection::new(executor.clone());
    let write = WriteConnection::new(executor)
        .with_auto_commit(!config.manual_commit)
        .with_execution_strategy(config.strategy);
    let reader = read.session();
    let writer = write.session();

    match &config.command {
        Command::SelectOne(args) => {
            let row: Option<JsonValue> = match &args.param {
                Some(param) => reader.select_one_with(&args.statement, param).await?,
                None => reader.select_one(&args.statement).await?,
            };
            Ok(row.unwrap_or(JsonValue::Null))
        }
        Command::SelectList(args) => {
            let statement = &args.statement.statement;
            let rows: Vec<JsonValue> = match (&args.statement.param, args.bounds()) {
                (None, None) => reader.select_list(statement).await?,
                (Some(param), None) => reader.select_list_with(statement, param).await?,
                (None, Some(bounds)) => reader.select_list_bounded(statement, bounds).await?,
                (Some(param), Some(bounds)) => {
                    reader
                        .select_list_with_bounds(statement, param, bounds)
                        .await?
                }
            };
            Ok(JsonValue::Array(rows))
        }
        Command::SelectMap { query, key } => {
            let statement = &query.statement.statement;
            let param = query.statement.param.clone().unwrap_or(JsonValue::Null);
            let grouped: HashMap<MapKey, JsonValue> = reader
                .select_map(statement, &param, key, query.bounds())
                .await?;
            Ok(JsonValue::Object(
                grouped
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ))
        }
        Command::Insert(args) => {
            let count = match &args.param {
                Some(param) => writer.insert_with(&args.statement, param).await?,
                None => writer.insert(&args.statement).await?,
            };
            Ok(affected_rows(count))
        }
        Command::Update(args) => {
            let count = match &args.param {
                Some(param) => writer.update_with(&args.statement, param).await?,
                None => writer.update(&args.statement).await?,
            };
            Ok(affected_rows(count))
        }
        Command::Delete(args) => {
            let count = match &args.param {
                Some(param) => writer.delete_with(&args.statement, param).await?,
                None => writer.delete(&args.statement).await?,
            };
            Ok(affected_rows(count))
        }
    }
}

fn affected_rows(count: u64) -> JsonValue {
    serde_json::json!({ "affected_rows": count })
}
