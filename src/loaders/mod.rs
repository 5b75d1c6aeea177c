//! Dataset loaders
//!
//! One [`Pipeline`](crate::pipeline::Pipeline) per published dataset. Each
//! loader reads the DfE or Ofsted CSV layout, maps its columns onto the
//! destination schema and declares how the resulting tables are loaded.

mod ks4;
mod ofsted;
mod sen;

pub use ks4::Ks4PerformancePipeline;
pub use ofsted::OfstedInspectionsPipeline;
pub use sen::SenStatisticsPipeline;

use crate::pipeline::{PipelineError, PipelineResult};
use crate::run_log::RunLog;
use crate::table::{Table, Value};

/// Keep rows whose `column` equals `expected`; a table without the column is
/// left alone
fn keep_level(table: &mut Table, column: &str, expected: &str) -> usize {
    table.retain_where(column, |v| v.as_str().map(str::trim) == Some(expected))
}

/// Drop rows whose `column` holds the literal `Total`
fn drop_totals(table: &mut Table, column: &str) -> usize {
    table.retain_where(column, |v| v.as_str().map(str::trim) != Some("Total"))
}

/// Set `column` to the same value on every row
fn fill(table: &mut Table, column: &str, value: Value) {
    table.set_column(column, |_| value.clone());
}

/// Add all-null columns for any of `columns` the table lacks
fn ensure_columns(table: &mut Table, columns: &[&str]) {
    for column in columns {
        if !table.has_column(column) {
            fill(table, column, Value::Null);
        }
    }
}

/// Project `raw` through a source→destination mapping, warning for every
/// absent source column. Fails when none of the mapped columns are present.
fn map_columns(raw: &Table, mapping: &[(&str, &str)], log: &mut RunLog) -> PipelineResult<Table> {
    let (table, missing) = raw.project(mapping);
    for column in &missing {
        log.warning(format!("Column '{column}' not found in source, skipping"));
    }
    if table.columns().is_empty() {
        return Err(PipelineError::Transform(
            "none of the expected columns were found; the file layout may have changed"
                .to_string(),
        ));
    }
    Ok(table)
}

/// Fail the transform when `raw` lacks a column it cannot work without
fn require_column(raw: &Table, column: &str) -> PipelineResult<()> {
    if raw.has_column(column) {
        Ok(())
    } else {
        Err(PipelineError::Transform(format!(
            "source has no '{column}' column"
        )))
    }
}
