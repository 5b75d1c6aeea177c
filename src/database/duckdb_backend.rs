//! DuckDB gateway

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use duckdb::types::Value as DuckValue;
use tracing::debug;

use super::{
    Backend, ConnectionInfo, DEFAULT_CHUNK_SIZE, DatabaseError, DatabaseGateway, coerce_to_kind,
    quote_ident,
};
use crate::table::{ColumnKind, Table, Value};

/// Gateway backed by an embedded DuckDB database
pub struct DuckDbGateway {
    conn: duckdb::Connection,
    path: Option<PathBuf>,
    chunk_size: usize,
}

impl DuckDbGateway {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = duckdb::Connection::open(path)
            .map_err(|e| DatabaseError::Connection(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Opened DuckDB database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn memory() -> Result<Self, DatabaseError> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Get the database path (if not in-memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// DuckDB dates are days since 1970-01-01, which is NaiveDate's default.
fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(n) => DuckValue::BigInt(*n),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Date(d) => DuckValue::Date32((*d - NaiveDate::default()).num_days() as i32),
        Value::Text(s) => DuckValue::Text(s.clone()),
    }
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::Int(n.into()),
        DuckValue::SmallInt(n) => Value::Int(n.into()),
        DuckValue::Int(n) => Value::Int(n.into()),
        DuckValue::BigInt(n) => Value::Int(n),
        DuckValue::UTinyInt(n) => Value::Int(n.into()),
        DuckValue::USmallInt(n) => Value::Int(n.into()),
        DuckValue::UInt(n) => Value::Int(n.into()),
        DuckValue::UBigInt(n) => i64::try_from(n)
            .map(Value::Int)
            .unwrap_or(Value::Float(n as f64)),
        DuckValue::HugeInt(n) => i64::try_from(n)
            .map(Value::Int)
            .unwrap_or(Value::Float(n as f64)),
        DuckValue::Float(f) => Value::Float(f.into()),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Date32(days) => Value::Date(NaiveDate::default() + Duration::days(days.into())),
        other => Value::Text(format!("{:?}", other)),
    }
}

impl DatabaseGateway for DuckDbGateway {
    fn backend(&self) -> Backend {
        Backend::DuckDb
    }

    fn read(&self, query: &str, params: &[Value]) -> Result<Table, DatabaseError> {
        let mut stmt = self.conn.prepare(query)?;
        let mut rows = stmt.query(duckdb::params_from_iter(params.iter().map(to_duck)))?;

        // Column names are available once the statement has executed
        let column_count = rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let column_names: Vec<String> = (0..column_count)
            .map(|i| {
                rows.as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut table = Table::new(column_names);
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: DuckValue = row.get(i)?;
                values.push(from_duck(value));
            }
            table.push_row(values);
        }

        Ok(table)
    }

    fn execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        kinds: &[ColumnKind],
        rows: &[Vec<Value>],
    ) -> Result<usize, DatabaseError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec![placeholders; rows.len()].join(", ")
        );

        let params: Vec<DuckValue> = rows
            .iter()
            .flat_map(|row| {
                row.iter()
                    .zip(kinds)
                    .map(|(value, kind)| to_duck(&coerce_to_kind(value, *kind)))
            })
            .collect();

        let inserted = self.conn.execute(&sql, duckdb::params_from_iter(params))?;
        Ok(inserted)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn connection_info(&self) -> Result<ConnectionInfo, DatabaseError> {
        let version: String = self
            .conn
            .query_row("SELECT version()", [], |row| row.get(0))
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        let table_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'main'",
            [],
            |row| row.get(0),
        )?;

        Ok(ConnectionInfo {
            backend: Backend::DuckDb,
            database: self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            user: None,
            version,
            table_count,
        })
    }
}
