//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving configuration, always before any data I/O
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    /// A setting has a value that cannot be used
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Configuration file could not be read
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A file discovery pattern is malformed
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::MissingEnv(var) => {
                format!(
                    "Missing required environment variable: {var}\n\n\
                    Hint: Export {var} before running, e.g. 'export {var}=...'."
                )
            }
            ConfigError::InvalidValue { key, reason } => {
                format!("Invalid value for {key}: {reason}\n\nHint: Check your environment and configuration file.")
            }
            ConfigError::Io { path, .. } => {
                format!(
                    "Cannot read configuration file: {}\n\nHint: Check that the file exists and is readable.",
                    path.display()
                )
            }
            ConfigError::InvalidPattern { pattern, .. } => {
                format!(
                    "Invalid glob pattern: {pattern}\n\n\
                    Hint: Use standard glob syntax like '**/ofsted*/**/*inspection*.csv'."
                )
            }
            _ => self.to_string(),
        }
    }
}
