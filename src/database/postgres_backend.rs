//! PostgreSQL gateway
//!
//! Wraps an async `tokio-postgres` client in a current-thread runtime so the
//! gateway stays synchronous. The connection task only makes progress while a
//! query is being driven by `block_on`, which is the only way the client is
//! used.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio::runtime::Runtime;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use super::{
    Backend, ConnectionInfo, DEFAULT_CHUNK_SIZE, DatabaseError, DatabaseGateway, PostgresSettings,
    coerce_to_kind, quote_ident, sql_type,
};
use crate::table::{ColumnKind, Table, Value};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway backed by a PostgreSQL server
pub struct PostgresGateway {
    runtime: Runtime,
    client: Client,
    database: String,
    user: String,
    chunk_size: usize,
}

type Param = Box<dyn ToSql + Sync + Send>;

impl PostgresGateway {
    /// Connect to the server described by `settings`
    pub fn connect(settings: &PostgresSettings) -> Result<Self, DatabaseError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DatabaseError::Connection(format!("cannot start runtime: {e}")))?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .dbname(&settings.database)
            .user(&settings.user)
            .password(&settings.password)
            .connect_timeout(CONNECT_TIMEOUT);

        let (client, connection) = runtime
            .block_on(pg_config.connect(NoTls))
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        runtime.spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!(host = %settings.host, database = %settings.database, "Connected to PostgreSQL");
        Ok(Self {
            runtime,
            client,
            database: settings.database.clone(),
            user: settings.user.clone(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, DatabaseError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(self.runtime.block_on(self.client.query(sql, &refs))?)
    }

    /// One multi-row `INSERT`.
    ///
    /// Nulls are inlined so untyped NULL can be assigned to any column type;
    /// other values carry an explicit cast matching their kind.
    fn insert_statement(
        &self,
        table: &str,
        columns: &[String],
        kinds: &[ColumnKind],
        rows: &[Vec<Value>],
    ) -> Result<usize, DatabaseError> {
        let mut params: Vec<Param> = Vec::new();
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let mut slots = Vec::with_capacity(columns.len());
            for (value, kind) in row.iter().zip(kinds) {
                let value = coerce_to_kind(value, *kind);
                if value.is_null() {
                    slots.push("NULL".to_string());
                } else {
                    params.push(to_param(&value));
                    slots.push(format!("${}::{}", params.len(), sql_type(*kind)));
                }
            }
            tuples.push(format!("({})", slots.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            tuples.join(", ")
        );

        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let inserted = self.runtime.block_on(self.client.execute(&sql, &refs))?;
        Ok(inserted as usize)
    }
}

/// Most bind parameters PostgreSQL accepts in one statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows that fit in one statement when every cell is a bind parameter
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn to_param(value: &Value) -> Param {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int(n) => Box::new(*n),
        Value::Float(f) => Box::new(*f),
        Value::Date(d) => Box::new(*d),
        Value::Text(s) => Box::new(s.clone()),
    }
}

fn cell(row: &Row, idx: usize) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let ty = row.columns()[idx].type_();
    match *ty {
        Type::BOOL => get::<bool>(row, idx).into(),
        Type::INT2 => get::<i16>(row, idx).map(i64::from).into(),
        Type::INT4 => get::<i32>(row, idx).map(i64::from).into(),
        Type::INT8 => get::<i64>(row, idx).into(),
        Type::FLOAT4 => get::<f32>(row, idx).map(f64::from).into(),
        Type::FLOAT8 => get::<f64>(row, idx).into(),
        Type::DATE => get::<NaiveDate>(row, idx).into(),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S").to_string())
            .into(),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)
            .map(|ts| ts.to_rfc3339())
            .into(),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::Text).unwrap_or(Value::Null),
            Err(e) => {
                debug!(column = row.columns()[idx].name(), error = %e, "Unsupported column type read as null");
                Value::Null
            }
        },
    }
}

impl DatabaseGateway for PostgresGateway {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn read(&self, query: &str, params: &[Value]) -> Result<Table, DatabaseError> {
        let params: Vec<Param> = params.iter().map(to_param).collect();
        let rows = self.query(query, &params)?;

        // Empty results carry no column metadata through `query`; prepare instead.
        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self
                .runtime
                .block_on(self.client.prepare(query))?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let mut table = Table::new(columns);
        for row in &rows {
            table.push_row((0..row.len()).map(|i| cell(row, i)).collect());
        }
        Ok(table)
    }

    fn execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.runtime.block_on(self.client.batch_execute(sql))?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let params: Vec<Param> = vec![Box::new(table.to_string())];
        let rows = self.query(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1::text",
            &params,
        )?;
        let count: i64 = rows.first().map(|r| r.get(0)).unwrap_or(0);
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

        let per_statement = rows_per_statement(columns.len());
        if rows.len() <= per_statement {
            return self.insert_statement(table, columns, kinds, rows);
        }

        // A chunk wider than one statement's bind limit still commits as a unit.
        debug!(table, rows = rows.len(), per_statement, "Splitting chunk across statements");
        self.execute("BEGIN")?;
        let mut inserted = 0;
        for part in rows.chunks(per_statement) {
            match self.insert_statement(table, columns, kinds, part) {
                Ok(n) => inserted += n,
                Err(e) => {
                    if let Err(rollback) = self.execute("ROLLBACK") {
                        error!(table, error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        self.execute("COMMIT")?;
        Ok(inserted)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn connection_info(&self) -> Result<ConnectionInfo, DatabaseError> {
        let rows = self
            .query("SELECT current_database(), current_user, version()", &[])
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        let row = rows
            .first()
            .ok_or_else(|| DatabaseError::Query("connection check returned no rows".to_string()))?;
        let database: String = row.get(0);
        let user: String = row.get(1);
        let version: String = row.get(2);

        let counts = self.query(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public'",
            &[],
        )?;
        let table_count: i64 = counts.first().map(|r| r.get(0)).unwrap_or(0);

        Ok(ConnectionInfo {
            backend: Backend::Postgres,
            database: if database.is_empty() {
                self.database.clone()
            } else {
                database
            },
            user: Some(if user.is_empty() { self.user.clone() } else { user }),
            version,
            table_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_statement_respects_bind_limit() {
        assert_eq!(rows_per_statement(1), 65_535);
        assert_eq!(rows_per_statement(10), 6_553);
        assert!(rows_per_statement(14) * 14 <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), 65_535);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
