//! UK Education ETL - pipelines loading public education datasets into an
//! analytics database
//!
//! Provides:
//! - Dataset discovery and academic-year tagging (via configuration)
//! - A database gateway over DuckDB or PostgreSQL
//! - Cleaning utilities for DfE and Ofsted exports
//! - The pipeline contract, runner and audit ledger
//! - Loaders for KS4 performance, SEN statistics and Ofsted inspections

pub mod cleaning;
pub mod config;
pub mod database;
pub mod loaders;
pub mod pipeline;
pub mod registry;
pub mod run_log;
pub mod source;
pub mod table;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use config::{ConfigError, DatasetConfig, DiscoveredFile, QualityThresholds, Range};
pub use database::{
    Backend, DatabaseConfig, DatabaseError, DatabaseGateway, WriteMode, connect,
};
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDbGateway;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresGateway;

pub use pipeline::{
    AuditLedger, AuditRecord, LoadStatus, Pipeline, PipelineError, PipelineOptions,
    PipelineReport, PipelineResult, PipelineRunner, RunStatus,
};
pub use registry::PipelineRegistry;
pub use run_log::RunLog;
pub use table::{ColumnKind, Table, Value};
