//! History command implementation

use clap::{Args, ValueEnum};

use crate::cli::commands::CliContext;
use crate::cli::error::CliError;
use crate::cli::output::format_summary;

/// Output format for `history`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryFormat {
    #[default]
    Table,
    Json,
}

/// Arguments for `history`
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Number of recent loads to show
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = HistoryFormat::Table)]
    pub format: HistoryFormat,
}

/// Handle the history command
pub fn handle_history(ctx: &CliContext, args: &HistoryArgs) -> Result<(), CliError> {
    let db = ctx.connect()?;
    let summary = ctx.registry.summary(db.as_ref(), args.limit)?;

    match args.format {
        HistoryFormat::Table => print!("{}", format_summary(&summary)),
        HistoryFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)
                .map_err(|e| CliError::Serialization(e.to_string()))?;
            println!("{json}");
        }
    }
    Ok(())
}
