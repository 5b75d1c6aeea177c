//! Error types for pipeline operations
//!
//! Extraction and transform errors fail a whole run. Validation and load
//! errors are scoped to one destination table and end up in the run log.
//! Audit errors are only ever logged.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::source::SourceError;

/// Errors that can occur during pipeline execution
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be resolved
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// No pipeline registered under the requested name
    #[error("Pipeline '{name}' not found. Available: {}", .available.join(", "))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    /// Source file could not be read or held no usable rows
    #[error("Extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// Raw rows could not be reshaped
    #[error("Transform failed: {0}")]
    Transform(String),

    /// A batch was rejected before load; `reason` names the table
    #[error("{reason}")]
    Validation { table: String, reason: String },

    /// A pre-load hook or write failed
    #[error("Failed to load {table}: {reason}")]
    Load { table: String, reason: String },

    /// The audit ledger could not be written or read
    #[error("Audit ledger error: {0}")]
    Audit(String),

    /// Database error (wrapped)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn load(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Configuration(err) => err.user_message(),
            PipelineError::NotFound { name, available } => {
                format!(
                    "Pipeline '{name}' not found.\n\nAvailable pipelines: {}\n\n\
                    Hint: Use 'uk-edu-etl list' to see registered pipelines.",
                    available.join(", ")
                )
            }
            PipelineError::Extraction { path, reason } => {
                format!(
                    "Cannot extract data from {}: {reason}\n\n\
                    Hint: Check that the file exists, is a CSV export and is not empty.",
                    path.display()
                )
            }
            PipelineError::Database(err) => err.user_message(),
            _ => self.to_string(),
        }
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io { ref path, .. }
            | SourceError::Empty(ref path)
            | SourceError::UnsupportedFormat { ref path, .. }
            | SourceError::Csv { ref path, .. } => {
                PipelineError::extraction(path.clone(), err.to_string())
            }
        }
    }
}
