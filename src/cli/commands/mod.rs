//! CLI command implementations

pub mod history;
pub mod pipelines;
pub mod status;

use std::path::Path;

use tracing::debug;

use crate::cli::error::CliError;
use crate::config::DatasetConfig;
use crate::database::{DatabaseConfig, DatabaseGateway, connect};
use crate::registry::PipelineRegistry;

/// State shared by every command: dataset configuration and registered
/// pipelines. The database is opened on demand.
pub struct CliContext {
    pub config: DatasetConfig,
    pub registry: PipelineRegistry,
}

impl CliContext {
    /// Build the context from an optional configuration file and data root
    /// override
    pub fn load(config_path: Option<&Path>, data_root: Option<&Path>) -> Result<Self, CliError> {
        let mut config = match config_path {
            Some(path) => DatasetConfig::from_file(path)?,
            None => DatasetConfig::default(),
        };
        if let Some(root) = data_root {
            config = config.with_data_root(root);
        }
        debug!(data_root = %config.data_root.display(), "Loaded dataset configuration");

        Ok(Self {
            config,
            registry: PipelineRegistry::with_defaults(),
        })
    }

    /// Open the database configured through the environment
    pub fn connect(&self) -> Result<Box<dyn DatabaseGateway>, CliError> {
        let db_config = DatabaseConfig::from_env()?;
        Ok(connect(&db_config)?)
    }
}
