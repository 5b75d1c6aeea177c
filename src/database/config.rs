//! Database connection settings resolved from the environment

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

pub const ENV_BACKEND: &str = "UK_EDU_DB_BACKEND";
pub const ENV_PATH: &str = "UK_EDU_DB_PATH";
pub const ENV_HOST: &str = "UK_EDU_DB_HOST";
pub const ENV_PORT: &str = "UK_EDU_DB_PORT";
pub const ENV_NAME: &str = "UK_EDU_DB_NAME";
pub const ENV_USER: &str = "UK_EDU_DB_USER";
pub const ENV_PASSWORD: &str = "UK_EDU_DB_PASSWORD";
pub const ENV_CHUNK_SIZE: &str = "UK_EDU_DB_CHUNK_SIZE";

/// Rows per insert chunk unless overridden
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Supported database backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded DuckDB file
    #[default]
    DuckDb,
    /// PostgreSQL server
    Postgres,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::DuckDb => write!(f, "duckdb"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "duckdb" => Ok(Backend::DuckDb),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(ConfigError::invalid(
                ENV_BACKEND,
                format!("unknown backend '{other}' (expected duckdb or postgres)"),
            )),
        }
    }
}

/// PostgreSQL connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Backend-specific connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    DuckDb { path: PathBuf },
    Postgres(PostgresSettings),
}

/// Resolved database settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub target: ConnectionTarget,
    pub chunk_size: usize,
}

impl DatabaseConfig {
    /// DuckDB database at `path`
    pub fn duckdb(path: impl Into<PathBuf>) -> Self {
        Self {
            target: ConnectionTarget::DuckDb { path: path.into() },
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn backend(&self) -> Backend {
        match self.target {
            ConnectionTarget::DuckDb { .. } => Backend::DuckDb,
            ConnectionTarget::Postgres(_) => Backend::Postgres,
        }
    }

    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    ///
    /// Missing required variables fail before any connection is attempted.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()));

        let backend = match get(ENV_BACKEND) {
            Some(value) => value.parse()?,
            None => Backend::default(),
        };

        let chunk_size = match get(ENV_CHUNK_SIZE) {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        ENV_CHUNK_SIZE,
                        format!("'{value}' is not a positive integer"),
                    ));
                }
            },
            None => DEFAULT_CHUNK_SIZE,
        };

        let target = match backend {
            Backend::DuckDb => ConnectionTarget::DuckDb {
                path: PathBuf::from(require(ENV_PATH)?),
            },
            Backend::Postgres => {
                let password = require(ENV_PASSWORD)?;
                let port = match get(ENV_PORT) {
                    Some(value) => value.trim().parse::<u16>().map_err(|_| {
                        ConfigError::invalid(ENV_PORT, format!("'{value}' is not a valid port"))
                    })?,
                    None => 5432,
                };
                ConnectionTarget::Postgres(PostgresSettings {
                    host: get(ENV_HOST).unwrap_or_else(|| "localhost".to_string()),
                    port,
                    database: get(ENV_NAME)
                        .unwrap_or_else(|| "uk_education_analytics".to_string()),
                    user: get(ENV_USER).unwrap_or_else(|| "uk_edu_user".to_string()),
                    password,
                })
            }
        };

        Ok(Self { target, chunk_size })
    }

    /// Connection description safe for logs and terminal output
    pub fn describe(&self) -> String {
        match &self.target {
            ConnectionTarget::DuckDb { path } => format!("duckdb://{}", path.display()),
            ConnectionTarget::Postgres(pg) => {
                format!("postgres://{}@{}:{}/{}", pg.user, pg.host, pg.port, pg.database)
            }
        }
    }
}
