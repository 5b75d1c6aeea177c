//! Pipeline runner driving extract, transform, load and audit

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use super::audit::{AuditLedger, AuditRecord, LoadStatus};
use super::error::{PipelineError, PipelineResult};
use super::report::{PipelineReport, RunStatus};
use super::{
    Dedup, LoadContext, Pipeline, TableLoadConfig, TransformContext, TransformedData,
    required_columns,
};
use crate::config::DatasetConfig;
use crate::database::{DatabaseGateway, quote_ident};
use crate::run_log::RunLog;
use crate::table::Table;

/// Lifecycle stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Created,
    Extracting,
    Transforming,
    Loading,
    Recording,
    Succeeded,
    Failed,
}

impl RunStage {
    pub fn name(&self) -> &'static str {
        match self {
            RunStage::Created => "created",
            RunStage::Extracting => "extracting",
            RunStage::Transforming => "transforming",
            RunStage::Loading => "loading",
            RunStage::Recording => "recording",
            RunStage::Succeeded => "succeeded",
            RunStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Succeeded | RunStage::Failed)
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-run options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Academic year tag; detected from the file path when absent
    pub academic_year: Option<String>,
    /// Run everything except writes and the audit append
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_academic_year(mut self, year: impl Into<String>) -> Self {
        self.academic_year = Some(year.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Runs one pipeline against one source file
pub struct PipelineRunner<'a> {
    pipeline: &'a dyn Pipeline,
    db: &'a dyn DatabaseGateway,
    config: &'a DatasetConfig,
    options: PipelineOptions,
    run_id: String,
    stage: RunStage,
    log: RunLog,
    /// Batches a dry run would have written, by table
    pending: BTreeMap<String, Table>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        pipeline: &'a dyn Pipeline,
        db: &'a dyn DatabaseGateway,
        config: &'a DatasetConfig,
        options: PipelineOptions,
    ) -> Self {
        Self {
            pipeline,
            db,
            config,
            options,
            run_id: Uuid::new_v4().to_string(),
            stage: RunStage::Created,
            log: RunLog::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    fn enter(&mut self, stage: RunStage) {
        debug_assert!(!self.stage.is_terminal(), "run already finished");
        debug!(from = %self.stage, to = %stage, "Run stage transition");
        self.stage = stage;
    }

    /// Check a batch can be loaded into `table`, recording an error when not
    pub fn validate(&mut self, batch: &Table, table: &str) -> bool {
        match check_batch(batch, table) {
            Ok(()) => true,
            Err(e) => {
                self.log.error(e.to_string());
                false
            }
        }
    }

    /// Load every transformed batch, returning rows written per table.
    ///
    /// A failing table records an error and a count of zero; the remaining
    /// tables are still loaded.
    pub fn load(&mut self, transformed: TransformedData) -> BTreeMap<String, usize> {
        let load_config = self.pipeline.load_config();
        let mut loaded = BTreeMap::new();

        for (table, batch) in transformed {
            let _span = info_span!("load_table", table = %table, rows = batch.len()).entered();

            let Some(table_config) = load_config.get(&table) else {
                self.log.warning(format!("No load config for {table}"));
                continue;
            };

            if !self.validate(&batch, &table) {
                loaded.insert(table, 0);
                continue;
            }

            match self.load_table(batch, &table, table_config) {
                Ok(count) => {
                    info!(table = %table, count, "Table loaded");
                    loaded.insert(table, count);
                }
                Err(e) => {
                    let message = match e {
                        PipelineError::Validation { reason, .. } => reason,
                        PipelineError::Load { reason, .. } => {
                            format!("Failed to load {table}: {reason}")
                        }
                        other => format!("Failed to load {table}: {other}"),
                    };
                    self.log.error(message);
                    loaded.insert(table, 0);
                }
            }
        }

        loaded
    }

    fn load_table(
        &mut self,
        mut batch: Table,
        table: &str,
        config: &TableLoadConfig,
    ) -> PipelineResult<usize> {
        if let Some(hook) = &config.pre_load {
            let ctx = LoadContext {
                db: self.db,
                pending: &self.pending,
            };
            batch = hook(batch, &ctx, &mut self.log)?;
        }

        match &config.dedup {
            Dedup::None => {}
            Dedup::Wholesale => {
                let removed = batch.dedup(&[]).unwrap_or_default();
                debug!(table, removed, "Removed duplicate rows");
            }
            Dedup::Keys(keys) => {
                let removed = batch.dedup(keys).ok_or_else(|| {
                    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                    PipelineError::validation(
                        table,
                        format!(
                            "Missing dedup key columns for {table}: [{}]",
                            batch.missing_columns(&keys).join(", ")
                        ),
                    )
                })?;
                let present = self.drop_existing_keys(&mut batch, table, keys)?;
                debug!(table, removed, present, "Deduplicated on keys");
                if present > 0 {
                    info!(table, skipped = present, "Skipped rows already in destination");
                }
            }
        }

        if batch.is_empty() {
            info!(table, "Nothing new to load");
            return Ok(0);
        }

        if self.options.dry_run {
            info!(table, rows = batch.len(), "Dry run: skipping write");
            let rows = batch.len();
            self.pending.insert(table.to_string(), batch);
            return Ok(rows);
        }

        self.db
            .write(&batch, table, config.mode)
            .map_err(|e| PipelineError::load(table, e.to_string()))
    }

    /// Remove rows whose key is already present in the destination table
    fn drop_existing_keys(
        &self,
        batch: &mut Table,
        table: &str,
        keys: &[String],
    ) -> PipelineResult<usize> {
        let Some(idxs) = batch.indices(keys) else {
            return Ok(0);
        };
        if keys.is_empty() || !self.db.table_exists(table)? {
            return Ok(0);
        }

        let query = format!(
            "SELECT DISTINCT {} FROM {}",
            keys.iter()
                .map(|k| quote_ident(k))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(table)
        );
        let existing = self.db.read(&query, &[])?;
        let all: Vec<usize> = (0..keys.len()).collect();
        let existing: HashSet<Vec<String>> = existing
            .rows()
            .iter()
            .map(|row| Table::row_key(row, &all))
            .collect();

        Ok(batch.retain_rows(|row| !existing.contains(&Table::row_key(row, &idxs))))
    }

    fn extract_and_transform(
        &mut self,
        path: &Path,
        ctx: &TransformContext,
    ) -> PipelineResult<TransformedData> {
        self.enter(RunStage::Extracting);
        let raw = {
            let _span = info_span!("extract").entered();
            let raw = self.pipeline.extract(path, &mut self.log)?;
            if raw.is_empty() {
                return Err(PipelineError::extraction(path, "no records extracted"));
            }
            info!(rows = raw.len(), columns = raw.columns().len(), "Extracted raw batch");
            raw
        };

        self.enter(RunStage::Transforming);
        let _span = info_span!("transform").entered();
        let transformed = self.pipeline.transform(&raw, ctx, &mut self.log)?;
        info!(
            tables = transformed.len(),
            rows = transformed.total_rows(),
            "Transformed batch"
        );
        Ok(transformed)
    }

    /// Execute the full run and report its outcome.
    ///
    /// Never fails: errors end up in the report, and the audit ledger gets one
    /// record per run unless this is a dry run.
    pub fn run(mut self, path: &Path) -> PipelineReport {
        let _span = info_span!(
            "etl_run",
            run_id = %self.run_id,
            pipeline = self.pipeline.name(),
            dry_run = self.options.dry_run
        )
        .entered();

        let start_time = Utc::now();
        let start = Instant::now();
        let academic_year = self
            .options
            .academic_year
            .clone()
            .unwrap_or_else(|| self.config.detect_academic_year(path));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        info!(file = %path.display(), academic_year = %academic_year, "Starting ETL run");

        let ctx = TransformContext::new(self.config, academic_year.clone());
        let records_loaded = match self.extract_and_transform(path, &ctx) {
            Ok(transformed) => {
                self.enter(RunStage::Loading);
                self.load(transformed)
            }
            Err(e) => {
                self.log.error(format!("ETL pipeline failed: {e}"));
                BTreeMap::new()
            }
        };

        let total_records: usize = records_loaded.values().sum();
        let status = if self.log.has_errors() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        self.enter(RunStage::Recording);
        if self.options.dry_run {
            info!("Dry run: audit record not written");
        } else {
            self.record(&file_name, &academic_year, total_records, status);
        }

        self.enter(match status {
            RunStatus::Succeeded => RunStage::Succeeded,
            RunStatus::Failed => RunStage::Failed,
        });

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            status = %status,
            total_records,
            errors = self.log.errors.len(),
            warnings = self.log.warnings.len(),
            duration_ms,
            "ETL run finished"
        );

        PipelineReport {
            run_id: self.run_id,
            pipeline: self.pipeline.name().to_string(),
            file_name,
            academic_year,
            status,
            records_loaded,
            total_records,
            errors: self.log.errors,
            warnings: self.log.warnings,
            start_time,
            end_time: Utc::now(),
            duration_ms,
            dry_run: self.options.dry_run,
        }
    }

    fn record(&self, file_name: &str, academic_year: &str, total: usize, status: RunStatus) {
        let source = self.pipeline.source();
        let mut record = AuditRecord::new(
            source.source_name,
            match status {
                RunStatus::Succeeded => LoadStatus::Success,
                RunStatus::Failed => LoadStatus::Failed,
            },
        );
        record.source_url = source.source_url;
        record.file_name = Some(file_name.to_string());
        record.academic_year = Some(academic_year.to_string());
        record.records_loaded = total as i64;
        record.error_message = self.log.joined_errors();

        if let Err(e) = AuditLedger::new(self.db).append(record) {
            error!(run_id = %self.run_id, error = %e, "Failed to record data source");
        }
    }
}

/// Reject empty batches and batches lacking the table's required columns
fn check_batch(batch: &Table, table: &str) -> PipelineResult<()> {
    if batch.is_empty() {
        return Err(PipelineError::validation(
            table,
            format!("Empty dataset for {table}"),
        ));
    }

    let missing = batch.missing_columns(required_columns(table));
    if !missing.is_empty() {
        return Err(PipelineError::validation(
            table,
            format!(
                "Missing required columns for {table}: [{}]",
                missing.join(", ")
            ),
        ));
    }
    Ok(())
}
