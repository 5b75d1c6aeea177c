//! ETL pipeline contract
//!
//! A dataset loader implements [`Pipeline`]: it extracts a raw batch from a
//! source file, transforms it into one batch per destination table and
//! describes how each table is loaded. [`PipelineRunner`] drives the common
//! part of every run:
//!
//! ```text
//! Created → Extracting → Transforming → Loading → Recording → Succeeded | Failed
//! ```
//!
//! Loading validates each batch, applies its pre-load hook, deduplicates and
//! writes through the [`DatabaseGateway`]. Every run that is not a dry run
//! appends one row to the audit ledger, whatever its outcome.

mod audit;
mod error;
mod report;
mod runner;

pub use audit::{AUDIT_TABLE, AuditLedger, AuditRecord, AuditSummary, LoadStatus};
pub use error::{PipelineError, PipelineResult};
pub use report::{PipelineReport, RunStatus};
pub use runner::{PipelineOptions, PipelineRunner, RunStage};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::config::{DatasetConfig, QualityThresholds};
use crate::database::{DatabaseGateway, WriteMode, quote_ident};
use crate::run_log::RunLog;
use crate::table::Table;

/// Where a dataset comes from, as recorded in the audit ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub source_name: String,
    pub source_url: Option<String>,
}

impl SourceInfo {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Run-scoped settings handed to [`Pipeline::transform`]
#[derive(Debug, Clone, PartialEq)]
pub struct TransformContext {
    pub academic_year: String,
    pub thresholds: QualityThresholds,
    pub sentinel_codes: Vec<String>,
}

impl TransformContext {
    pub fn new(config: &DatasetConfig, academic_year: impl Into<String>) -> Self {
        Self {
            academic_year: academic_year.into(),
            thresholds: config.thresholds.clone(),
            sentinel_codes: config.sentinel_codes.clone(),
        }
    }
}

/// Destination batches produced by a transform, in load order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedData {
    tables: Vec<(String, Table)>,
}

impl TransformedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch for `table`, replacing any earlier batch for it
    pub fn insert(&mut self, table: impl Into<String>, batch: Table) {
        let table = table.into();
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some(slot) => slot.1 = batch,
            None => self.tables.push((table, batch)),
        }
    }

    pub fn with(mut self, table: impl Into<String>, batch: Table) -> Self {
        self.insert(table, batch);
        self
    }

    pub fn get(&self, table: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, batch)| batch)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, batch)| batch.len()).sum()
    }
}

impl IntoIterator for TransformedData {
    type Item = (String, Table);
    type IntoIter = std::vec::IntoIter<(String, Table)>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

/// Deduplication applied to a batch before it is written
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dedup {
    #[default]
    None,
    /// Keep the first row per key, and skip keys already in the destination
    Keys(Vec<String>),
    /// Drop exact duplicate rows within the batch
    Wholesale,
}

/// What a pre-load hook can see of the destination
pub struct LoadContext<'a> {
    pub db: &'a dyn DatabaseGateway,
    /// Batches a dry run accepted earlier in the same run without writing them
    pub pending: &'a BTreeMap<String, Table>,
}

impl LoadContext<'_> {
    /// Distinct non-null values of `column` in `table`, counting both stored
    /// rows and rows pending from a dry run
    pub fn known_keys(&self, table: &str, column: &str) -> PipelineResult<HashSet<String>> {
        let mut keys = HashSet::new();
        if self.db.table_exists(table)? {
            let query = format!(
                "SELECT DISTINCT {} FROM {}",
                quote_ident(column),
                quote_ident(table)
            );
            keys.extend(
                self.db
                    .read(&query, &[])?
                    .rows()
                    .iter()
                    .filter_map(|row| row.first())
                    .filter(|v| !v.is_null())
                    .map(|v| v.key()),
            );
        }
        if let Some(values) = self.pending.get(table).and_then(|batch| batch.column(column)) {
            keys.extend(values.filter(|v| !v.is_null()).map(|v| v.key()));
        }
        Ok(keys)
    }
}

/// Transformation applied to a batch right before it is deduplicated and written
pub type PreLoadHook =
    Box<dyn Fn(Table, &LoadContext<'_>, &mut RunLog) -> PipelineResult<Table>>;

/// How one destination table is loaded
#[derive(Default)]
pub struct TableLoadConfig {
    pub mode: WriteMode,
    pub dedup: Dedup,
    pub pre_load: Option<PreLoadHook>,
}

impl TableLoadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dedup_on(mut self, keys: &[&str]) -> Self {
        self.dedup = Dedup::Keys(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_pre_load(mut self, hook: PreLoadHook) -> Self {
        self.pre_load = Some(hook);
        self
    }
}

impl std::fmt::Debug for TableLoadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLoadConfig")
            .field("mode", &self.mode)
            .field("dedup", &self.dedup)
            .field("pre_load", &self.pre_load.is_some())
            .finish()
    }
}

/// Load settings per destination table
#[derive(Debug, Default)]
pub struct LoadConfig {
    tables: BTreeMap<String, TableLoadConfig>,
}

impl LoadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: impl Into<String>, config: TableLoadConfig) -> Self {
        self.tables.insert(name.into(), config);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableLoadConfig> {
        self.tables.get(name)
    }
}

/// A dataset-specific ETL pipeline
pub trait Pipeline {
    /// Registry name, e.g. `ks4_performance`
    fn name(&self) -> &str;

    /// Source description for the audit ledger
    fn source(&self) -> SourceInfo;

    /// Read the source file into a raw batch.
    ///
    /// Must return a non-empty batch or fail with
    /// [`PipelineError::Extraction`].
    fn extract(&self, path: &Path, log: &mut RunLog) -> PipelineResult<Table>;

    /// Reshape the raw batch into destination batches
    fn transform(
        &self,
        raw: &Table,
        ctx: &TransformContext,
        log: &mut RunLog,
    ) -> PipelineResult<TransformedData>;

    /// Per-table load settings; tables without settings are skipped
    fn load_config(&self) -> LoadConfig;
}

/// Columns a batch must carry to be loaded into `table`
pub fn required_columns(table: &str) -> &'static [&'static str] {
    match table {
        "schools" => &["urn", "school_name"],
        "school_performance" => &["urn", "academic_year", "key_stage"],
        "sen_pupils" => &["academic_year", "sen_provision"],
        "local_authorities" => &["la_code", "la_name", "region"],
        "ofsted_inspections" => &["urn", "inspection_date"],
        _ => &[],
    }
}

/// Pre-load hook keeping only rows whose `key` already exists in `parent`.
///
/// A missing parent table filters out every row. During a dry run the
/// parent's pending batch counts as existing.
pub fn filter_to_existing(parent: &'static str, key: &'static str) -> PreLoadHook {
    Box::new(move |mut batch: Table, ctx: &LoadContext<'_>, log: &mut RunLog| {
        let existing = ctx.known_keys(parent, key)?;
        let removed = batch.retain_where(key, |v| existing.contains(&v.key()));
        debug!(parent, key, known = existing.len(), removed, "Filtered to existing parents");
        if removed > 0 {
            log.warning(format!(
                "Filtered {removed} records with no matching {key} in {parent}"
            ));
        }
        Ok(batch)
    })
}
