//! Output formatting for CLI

use crate::config::DiscoveredFile;
use crate::database::{ConnectionInfo, TableCount};
use crate::pipeline::{AuditRecord, AuditSummary};
use crate::registry::RegisteredPipeline;

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Format the registered pipelines
pub fn format_pipelines(pipelines: &[RegisteredPipeline]) -> String {
    let mut output = String::new();
    output.push_str(&format!("Registered pipelines ({}):\n", pipelines.len()));
    for pipeline in pipelines {
        output.push_str(&format!("  {:<22} {}\n", pipeline.name, pipeline.description));
    }
    output
}

/// Format discovered files for one dataset
pub fn format_dataset_files(dataset: &str, files: &[DiscoveredFile]) -> String {
    let mut output = String::new();
    output.push_str(&format!("\n{} ({} file(s))\n", dataset, files.len()));
    if files.is_empty() {
        output.push_str("  (none found)\n");
    }
    for file in files {
        output.push_str(&format!(
            "  {:<48} {:>8.2} MB  {}\n",
            file.file_name(),
            file.size_mb(),
            file.academic_year
        ));
        output.push_str(&format!("    {}\n", file.path.display()));
    }
    output
}

/// Format audit records as a table
pub fn format_history(records: &[AuditRecord]) -> String {
    let mut output = String::new();
    if records.is_empty() {
        output.push_str("No loads recorded yet.\n");
        return output;
    }

    output.push_str(&format!(
        "{:>5}  {:<10}  {:<8}  {:>9}  {:<8}  {}\n",
        "ID", "DATE", "STATUS", "RECORDS", "YEAR", "SOURCE"
    ));
    for record in records {
        let date = record
            .download_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{:>5}  {:<10}  {:<8}  {:>9}  {:<8}  {}\n",
            record.id,
            date,
            record.load_status,
            record.records_loaded,
            or_dash(record.academic_year.as_deref()),
            record.source_name
        ));
        if let Some(file) = &record.file_name {
            output.push_str(&format!("{:>5}  file: {}\n", "", file));
        }
        if let Some(error) = &record.error_message {
            output.push_str(&format!("{:>5}  error: {}\n", "", error));
        }
    }
    output
}

/// Format ledger totals followed by the recent loads
pub fn format_summary(summary: &AuditSummary) -> String {
    let mut output = String::new();
    output.push_str("Data source summary\n");
    output.push_str(&format!("  Total records loaded: {}\n", summary.total_records));
    output.push_str(&format!(
        "  Loads: {} ({} successful, {:.1}% success rate)\n\n",
        summary.total_loads,
        summary.successful_loads,
        summary.success_rate()
    ));
    output.push_str(&format_history(&summary.recent));
    output
}

/// Format connectivity details and per-table row counts
pub fn format_status(info: &ConnectionInfo, counts: &[TableCount]) -> String {
    let mut output = String::new();
    output.push_str("✅ Database connection ok\n");
    output.push_str(&format!("  Backend:  {}\n", info.backend));
    output.push_str(&format!("  Database: {}\n", info.database));
    output.push_str(&format!("  User:     {}\n", or_dash(info.user.as_deref())));
    output.push_str(&format!("  Version:  {}\n", info.version));
    output.push_str(&format!("  Tables:   {}\n", info.table_count));

    output.push_str("\nRow counts:\n");
    for count in counts {
        match &count.count {
            Ok(n) => output.push_str(&format!("  {:<22} {:>10}\n", count.table, n)),
            Err(e) => output.push_str(&format!("  {:<22} ⚠️  {}\n", count.table, e)),
        }
    }
    output
}
