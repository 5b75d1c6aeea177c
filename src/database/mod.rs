//! Database gateway
//!
//! A [`DatabaseGateway`] owns one connection to the destination database and
//! exposes the handful of operations the pipelines need: parameterized reads,
//! chunked bulk writes, existence checks and best-effort row counts.
//!
//! Backends are feature-gated:
//! - `duckdb-backend`: embedded DuckDB file (default)
//! - `postgres-backend`: PostgreSQL server
//!
//! Queries use `$1`-style positional placeholders, which both backends accept.

mod config;
mod error;

#[cfg(feature = "duckdb-backend")]
mod duckdb_backend;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use config::{
    Backend, ConnectionTarget, DEFAULT_CHUNK_SIZE, DatabaseConfig, PostgresSettings, ENV_BACKEND,
    ENV_CHUNK_SIZE, ENV_HOST, ENV_NAME, ENV_PASSWORD, ENV_PATH, ENV_PORT, ENV_USER,
};
pub use error::DatabaseError;

#[cfg(feature = "duckdb-backend")]
pub use duckdb_backend::DuckDbGateway;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresGateway;

use serde::Serialize;
use tracing::{info, warn};

use crate::table::{ColumnKind, Table, Value};

/// How a write treats an existing destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert into the table, creating it when absent
    #[default]
    Append,
    /// Drop and recreate the table before inserting
    Replace,
    /// Refuse to write when the table already exists
    FailIfExists,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Replace => write!(f, "replace"),
            WriteMode::FailIfExists => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "replace" => Ok(WriteMode::Replace),
            "fail" | "fail_if_exists" => Ok(WriteMode::FailIfExists),
            _ => Err(format!("Invalid write mode: {}", s)),
        }
    }
}

/// Row count of one table, or the reason it could not be counted
#[derive(Debug)]
pub struct TableCount {
    pub table: String,
    pub count: Result<i64, DatabaseError>,
}

/// Connectivity details reported by the status command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub backend: Backend,
    pub database: String,
    pub user: Option<String>,
    pub version: String,
    pub table_count: i64,
}

/// Operations the pipelines perform against the destination database
pub trait DatabaseGateway {
    /// Which backend this gateway talks to
    fn backend(&self) -> Backend;

    /// Run a read-only query with positional parameters
    fn read(&self, query: &str, params: &[Value]) -> Result<Table, DatabaseError>;

    /// Run one or more statements that return no rows
    fn execute(&self, sql: &str) -> Result<(), DatabaseError>;

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError>;

    /// Insert `rows` into an existing table as one statement
    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        kinds: &[ColumnKind],
        rows: &[Vec<Value>],
    ) -> Result<usize, DatabaseError>;

    /// Rows per insert statement
    fn chunk_size(&self) -> usize {
        DEFAULT_CHUNK_SIZE
    }

    fn connection_info(&self) -> Result<ConnectionInfo, DatabaseError>;

    /// Write a batch into `table`.
    ///
    /// Rows go in chunks of [`chunk_size`](Self::chunk_size) in batch order,
    /// each chunk committed on its own. When a chunk fails, earlier chunks stay
    /// committed and the error is returned.
    fn write(&self, batch: &Table, table: &str, mode: WriteMode) -> Result<usize, DatabaseError> {
        let kinds = batch.column_kinds();
        let exists = self.table_exists(table)?;

        match (mode, exists) {
            (WriteMode::FailIfExists, true) => {
                return Err(DatabaseError::TableExists(table.to_string()));
            }
            (WriteMode::Replace, true) => {
                self.execute(&format!("DROP TABLE {}", quote_ident(table)))?;
                self.execute(&create_table_sql(table, batch.columns(), &kinds))?;
            }
            (_, false) => {
                info!(table, columns = batch.columns().len(), "Creating table");
                self.execute(&create_table_sql(table, batch.columns(), &kinds))?;
            }
            (WriteMode::Append, true) => {}
        }

        let mut written = 0;
        for (i, chunk) in batch.chunks(self.chunk_size()).enumerate() {
            match self.insert_rows(table, batch.columns(), &kinds, chunk) {
                Ok(n) => written += n,
                Err(e) => {
                    warn!(table, chunk = i, written, error = %e, "Chunk insert failed");
                    return Err(e);
                }
            }
        }

        info!(table, rows = written, mode = %mode, "Wrote batch");
        Ok(written)
    }

    fn count_rows(&self, table: &str) -> Result<i64, DatabaseError> {
        let result = self.read(
            &format!("SELECT COUNT(*) AS row_count FROM {}", quote_ident(table)),
            &[],
        )?;
        result
            .rows()
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| DatabaseError::Query(format!("COUNT(*) on {table} returned no value")))
    }

    /// Count rows per table; a failing table never aborts the others
    fn row_counts(&self, tables: &[&str]) -> Vec<TableCount> {
        tables
            .iter()
            .map(|table| TableCount {
                table: table.to_string(),
                count: self.count_rows(table),
            })
            .collect()
    }

    /// Probe connectivity, logging the outcome
    fn test_connection(&self) -> bool {
        match self.connection_info() {
            Ok(info) => {
                info!(backend = %info.backend, database = %info.database, version = %info.version, "Database connection ok");
                true
            }
            Err(e) => {
                warn!(error = %e, "Database connection failed");
                false
            }
        }
    }
}

/// Open a gateway for the configured backend
pub fn connect(config: &DatabaseConfig) -> Result<Box<dyn DatabaseGateway>, DatabaseError> {
    info!(database = %config.describe(), "Connecting to database");
    match &config.target {
        #[cfg(feature = "duckdb-backend")]
        ConnectionTarget::DuckDb { path } => Ok(Box::new(
            DuckDbGateway::open(path)?.with_chunk_size(config.chunk_size),
        )),
        #[cfg(feature = "postgres-backend")]
        ConnectionTarget::Postgres(settings) => Ok(Box::new(
            PostgresGateway::connect(settings)?.with_chunk_size(config.chunk_size),
        )),
        #[allow(unreachable_patterns)]
        other => Err(DatabaseError::UnsupportedBackend(match other {
            ConnectionTarget::DuckDb { .. } => Backend::DuckDb.to_string(),
            ConnectionTarget::Postgres(_) => Backend::Postgres.to_string(),
        })),
    }
}

/// Quote an identifier for use in SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL type used when creating a column of the given kind
pub fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Bool => "BOOLEAN",
        ColumnKind::Int => "BIGINT",
        ColumnKind::Float => "DOUBLE PRECISION",
        ColumnKind::Date => "DATE",
        ColumnKind::Text => "TEXT",
    }
}

/// `CREATE TABLE` statement for a batch's inferred columns
pub fn create_table_sql(table: &str, columns: &[String], kinds: &[ColumnKind]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .zip(kinds)
        .map(|(name, kind)| format!("{} {}", quote_ident(name), sql_type(*kind)))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

/// Convert a value to the representation its column kind expects
pub fn coerce_to_kind(value: &Value, kind: ColumnKind) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (ColumnKind::Float, Value::Int(n)) => Value::Float(*n as f64),
        (ColumnKind::Text, Value::Text(_)) => value.clone(),
        (ColumnKind::Text, other) => Value::Text(other.to_string()),
        _ => value.clone(),
    }
}
