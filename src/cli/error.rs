//! CLI error type

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::pipeline::PipelineError;

/// Errors surfaced by CLI commands; every variant exits with status 1
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("No source files found for dataset '{0}'")]
    NoFiles(String),

    #[error("Could not auto-detect a pipeline for {0}")]
    DetectionFailed(PathBuf),

    #[error("Pipeline '{pipeline}' finished with {errors} error(s)")]
    RunFailed { pipeline: String, errors: usize },

    #[error("Failed to serialize output: {0}")]
    Serialization(String),
}

impl CliError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            CliError::Config(err) => err.user_message(),
            CliError::Database(err) => err.user_message(),
            CliError::Pipeline(err) => err.user_message(),
            CliError::FileNotFound(path) => {
                format!(
                    "File not found: {}\n\nHint: Check the path, or use 'uk-edu-etl datasets' to list discovered files.",
                    path.display()
                )
            }
            CliError::NoFiles(dataset) => {
                format!(
                    "No source files found for dataset '{dataset}'.\n\n\
                    Hint: Pass a file explicitly or point --data-root at your downloads."
                )
            }
            CliError::DetectionFailed(path) => {
                format!(
                    "Could not auto-detect a pipeline for {}\n\n\
                    Hint: Use 'uk-edu-etl run <pipeline> <file>' to choose one explicitly.",
                    path.display()
                )
            }
            _ => self.to_string(),
        }
    }
}
