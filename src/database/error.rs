//! Error types for database operations

use thiserror::Error;

/// Errors raised by a [`DatabaseGateway`](super::DatabaseGateway)
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The database could not be reached or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed SQL, constraint violation or type mismatch
    #[error("Query error: {0}")]
    Query(String),

    /// Write with fail-if-exists mode found the table already present
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Requested backend was not compiled into this build
    #[error("Database backend '{0}' is not enabled in this build")]
    UnsupportedBackend(String),
}

impl DatabaseError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            DatabaseError::Connection(msg) => {
                format!(
                    "Cannot connect to the database: {msg}\n\n\
                    Hint: Check UK_EDU_DB_BACKEND and the connection variables, then run 'uk-edu-etl status'."
                )
            }
            DatabaseError::TableExists(table) => {
                format!(
                    "Table already exists: {table}\n\nHint: Use append or replace mode to write into an existing table."
                )
            }
            DatabaseError::UnsupportedBackend(backend) => {
                format!(
                    "Database backend '{backend}' is not enabled.\n\n\
                    Hint: Rebuild with --features {backend}-backend."
                )
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for DatabaseError {
    fn from(err: duckdb::Error) -> Self {
        DatabaseError::Query(err.to_string())
    }
}

#[cfg(feature = "postgres-backend")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            DatabaseError::Connection(err.to_string())
        } else {
            DatabaseError::Query(err.to_string())
        }
    }
}
