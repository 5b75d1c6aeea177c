//! CLI module for the uk-edu-etl binary

pub mod commands;
pub mod error;
pub mod output;

pub use commands::CliContext;
pub use error::CliError;
