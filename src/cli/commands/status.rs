//! Status command implementation

use crate::cli::commands::CliContext;
use crate::cli::error::CliError;
use crate::cli::output::{format_history, format_status};
use crate::pipeline::AUDIT_TABLE;

/// Tables whose row counts are reported
const TRACKED_TABLES: &[&str] = &[
    "schools",
    "school_performance",
    "local_authorities",
    "sen_pupils",
    "ofsted_inspections",
    AUDIT_TABLE,
];

const RECENT_LOADS: usize = 5;

/// Handle the status command
pub fn handle_status(ctx: &CliContext) -> Result<(), CliError> {
    let db = ctx.connect()?;
    let info = db.connection_info()?;
    let counts = db.row_counts(TRACKED_TABLES);
    print!("{}", format_status(&info, &counts));

    println!("\nRecent loads:");
    let recent = ctx.registry.history(db.as_ref(), RECENT_LOADS)?;
    print!("{}", format_history(&recent));
    Ok(())
}
