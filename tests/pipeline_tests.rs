//! Pipeline runner behaviour against an in-memory DuckDB database

#![cfg(feature = "duckdb-backend")]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uk_education_etl::database::{ConnectionInfo, DatabaseError, DuckDbGateway};
use uk_education_etl::pipeline::{
    AUDIT_TABLE, AuditLedger, Dedup, LoadConfig, LoadStatus, Pipeline, PipelineError,
    PipelineOptions, PipelineReport, PipelineResult, PipelineRunner, RunStatus, SourceInfo,
    TableLoadConfig, TransformContext, TransformedData,
};
use uk_education_etl::source::read_csv;
use uk_education_etl::{
    Backend, ColumnKind, DatabaseGateway, DatasetConfig, RunLog, Table, Value, WriteMode,
};

/// Splits a CSV into `alpha` (id, name), `beta` (id, score) and an
/// unconfigured `gamma`
struct TwoTables {
    keyed: bool,
}

impl Pipeline for TwoTables {
    fn name(&self) -> &str {
        "two_tables"
    }

    fn source(&self) -> SourceInfo {
        SourceInfo::new("Test source").with_url("https://example.org/data")
    }

    fn extract(&self, path: &Path, _log: &mut RunLog) -> PipelineResult<Table> {
        Ok(read_csv(path)?)
    }

    fn transform(
        &self,
        raw: &Table,
        _ctx: &TransformContext,
        _log: &mut RunLog,
    ) -> PipelineResult<TransformedData> {
        let (alpha, _) = raw.project(&[("id", "id"), ("name", "name")]);
        let (beta, _) = raw.project(&[("id", "id"), ("score", "score")]);
        Ok(TransformedData::new()
            .with("alpha", alpha)
            .with("beta", beta)
            .with("gamma", raw.clone()))
    }

    fn load_config(&self) -> LoadConfig {
        let table = || {
            if self.keyed {
                TableLoadConfig::new().dedup_on(&["id"])
            } else {
                TableLoadConfig::new()
            }
        };
        LoadConfig::new().table("alpha", table()).table("beta", table())
    }
}

/// Loads the raw batch as-is into `alpha` with the given settings
struct SingleTable {
    config: fn() -> TableLoadConfig,
    fail_transform: bool,
}

impl SingleTable {
    fn new(config: fn() -> TableLoadConfig) -> Self {
        Self {
            config,
            fail_transform: false,
        }
    }
}

impl Pipeline for SingleTable {
    fn name(&self) -> &str {
        "single_table"
    }

    fn source(&self) -> SourceInfo {
        SourceInfo::new("Single table source")
    }

    fn extract(&self, path: &Path, _log: &mut RunLog) -> PipelineResult<Table> {
        Ok(read_csv(path)?)
    }

    fn transform(
        &self,
        raw: &Table,
        _ctx: &TransformContext,
        _log: &mut RunLog,
    ) -> PipelineResult<TransformedData> {
        if self.fail_transform {
            return Err(PipelineError::Transform("score column is malformed".to_string()));
        }
        Ok(TransformedData::new().with("alpha", raw.clone()))
    }

    fn load_config(&self) -> LoadConfig {
        LoadConfig::new().table("alpha", (self.config)())
    }
}

/// Delegates to DuckDB but rejects every insert into one table
struct FailingGateway {
    inner: DuckDbGateway,
    fail_table: &'static str,
}

impl DatabaseGateway for FailingGateway {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    fn read(&self, query: &str, params: &[Value]) -> Result<Table, DatabaseError> {
        self.inner.read(query, params)
    }

    fn execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.inner.execute(sql)
    }

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        self.inner.table_exists(table)
    }

    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        kinds: &[ColumnKind],
        rows: &[Vec<Value>],
    ) -> Result<usize, DatabaseError> {
        if table == self.fail_table {
            return Err(DatabaseError::Query(format!("constraint violated on {table}")));
        }
        self.inner.insert_rows(table, columns, kinds, rows)
    }

    fn connection_info(&self) -> Result<ConnectionInfo, DatabaseError> {
        self.inner.connection_info()
    }
}

fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn sample(dir: &TempDir) -> PathBuf {
    write_csv(dir, "sample_202324.csv", "id,name,score\n1,one,10\n2,two,20\n")
}

#[test]
fn test_successful_run_records_audit() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    let report = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.academic_year, "2023-24");
    assert_eq!(report.file_name, "sample_202324.csv");
    assert_eq!(report.records_loaded.get("alpha"), Some(&2));
    assert_eq!(report.records_loaded.get("beta"), Some(&2));
    assert!(!report.records_loaded.contains_key("gamma"));
    assert_eq!(report.total_records, 4);
    assert_eq!(report.warnings, vec!["No load config for gamma"]);

    let history = AuditLedger::new(&db).history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].load_status, LoadStatus::Success);
    assert_eq!(history[0].records_loaded, 4);
    assert_eq!(history[0].source_url.as_deref(), Some("https://example.org/data"));
    assert_eq!(history[0].error_message, None);
}

#[test]
fn test_extraction_failure_fails_run_with_one_audit_record() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.csv");
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    let report = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&missing);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.total_records, 0);
    assert!(report.records_loaded.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("ETL pipeline failed:"));

    let history = AuditLedger::new(&db).history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].load_status, LoadStatus::Failed);
    assert_eq!(history[0].records_loaded, 0);
    assert!(history[0].error_message.as_deref().unwrap().contains("ETL pipeline failed"));
}

#[test]
fn test_header_only_file_is_an_extraction_failure() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "empty.csv", "id,name,score\n");
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    let report = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);
    assert_eq!(report.status, RunStatus::Failed);
    assert!(!db.table_exists("alpha").unwrap());
}

#[test]
fn test_partial_failure_keeps_loaded_tables() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = FailingGateway {
        inner: DuckDbGateway::memory().unwrap(),
        fail_table: "beta",
    };
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    let report = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.records_loaded.get("alpha"), Some(&2));
    assert_eq!(report.records_loaded.get("beta"), Some(&0));
    assert_eq!(report.total_records, 2);
    assert_eq!(
        report.errors,
        vec!["Failed to load beta: Query error: constraint violated on beta"]
    );
    assert_eq!(db.count_rows("alpha").unwrap(), 2);

    let history = AuditLedger::new(&db).history(1).unwrap();
    assert_eq!(history[0].load_status, LoadStatus::Failed);
    assert_eq!(history[0].records_loaded, 2);
}

#[test]
fn test_append_without_dedup_doubles_rows() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    for _ in 0..2 {
        let report =
            PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);
        assert!(report.is_success());
    }
    assert_eq!(db.count_rows("alpha").unwrap(), 4);
}

#[test]
fn test_keyed_dedup_rerun_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: true };

    let first = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);
    let second = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);

    assert_eq!(first.total_records, 4);
    assert!(second.is_success());
    assert_eq!(second.records_loaded.get("alpha"), Some(&0));
    assert_eq!(second.total_records, 0);
    assert_eq!(db.count_rows("alpha").unwrap(), 2);
    assert_eq!(db.count_rows("beta").unwrap(), 2);
    assert_eq!(AuditLedger::new(&db).history(10).unwrap().len(), 2);
}

#[test]
fn test_keyed_dedup_within_batch() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "dupes.csv", "id,name,score\n1,one,10\n1,uno,11\n2,two,20\n");
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: true };

    let report = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new()).run(&path);
    assert_eq!(report.records_loaded.get("alpha"), Some(&2));

    let names = db
        .read("SELECT name FROM alpha WHERE id = $1", &[Value::text("1")])
        .unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names.value(0, "name"), Some(&Value::text("one")));
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };

    let options = PipelineOptions::new()
        .dry_run(true)
        .with_academic_year("2021-22");
    let report = PipelineRunner::new(&pipeline, &db, &config, options).run(&path);

    assert!(report.dry_run);
    assert!(report.is_success());
    assert_eq!(report.academic_year, "2021-22");
    assert_eq!(report.total_records, 4);
    assert!(!db.table_exists("alpha").unwrap());
    assert!(AuditLedger::new(&db).history(10).unwrap().is_empty());
}

#[test]
fn test_validate_rejects_empty_and_incomplete_batches() {
    let db = DuckDbGateway::memory().unwrap();
    let config = DatasetConfig::default();
    let pipeline = TwoTables { keyed: false };
    let mut runner = PipelineRunner::new(&pipeline, &db, &config, PipelineOptions::new());

    assert!(!runner.validate(&Table::new(["urn"]), "schools"));
    let incomplete = Table::from_rows(["urn"], vec![vec![Value::Int(100001)]]);
    assert!(!runner.validate(&incomplete, "schools"));
    let complete = Table::from_rows(
        ["urn", "school_name"],
        vec![vec![Value::Int(100001), Value::text("Alpha")]],
    );
    assert!(runner.validate(&complete, "schools"));

    assert_eq!(
        runner.log().errors,
        vec![
            "Empty dataset for schools".to_string(),
            "Missing required columns for schools: [school_name]".to_string(),
        ]
    );
}

fn run_once(pipeline: &dyn Pipeline, db: &dyn DatabaseGateway, path: &Path) -> PipelineReport {
    let config = DatasetConfig::default();
    PipelineRunner::new(pipeline, db, &config, PipelineOptions::new()).run(path)
}

#[test]
fn test_audit_failure_does_not_change_report() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = FailingGateway {
        inner: DuckDbGateway::memory().unwrap(),
        fail_table: AUDIT_TABLE,
    };
    let pipeline = TwoTables { keyed: false };

    let report = run_once(&pipeline, &db, &path);

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.total_records, 4);
    assert!(report.errors.is_empty());
    assert_eq!(db.count_rows("alpha").unwrap(), 2);
    assert!(AuditLedger::new(&db).history(10).unwrap().is_empty());
}

#[test]
fn test_transform_failure_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let pipeline = SingleTable {
        config: TableLoadConfig::new,
        fail_transform: true,
    };

    let report = run_once(&pipeline, &db, &path);

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.records_loaded.is_empty());
    assert_eq!(
        report.errors,
        vec!["ETL pipeline failed: Transform failed: score column is malformed"]
    );
    assert!(!db.table_exists("alpha").unwrap());

    let history = AuditLedger::new(&db).history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].load_status, LoadStatus::Failed);
    assert_eq!(history[0].records_loaded, 0);
}

#[test]
fn test_wholesale_dedup_drops_exact_duplicates_within_batch() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "dupes.csv",
        "id,name,score\n1,one,10\n1,one,10\n1,one,11\n2,two,20\n",
    );
    let db = DuckDbGateway::memory().unwrap();
    let pipeline = SingleTable::new(|| TableLoadConfig {
        dedup: Dedup::Wholesale,
        ..TableLoadConfig::new()
    });

    let first = run_once(&pipeline, &db, &path);
    assert_eq!(first.records_loaded.get("alpha"), Some(&3));

    // Only duplicates within one batch are dropped.
    let second = run_once(&pipeline, &db, &path);
    assert!(second.is_success());
    assert_eq!(db.count_rows("alpha").unwrap(), 6);
}

#[test]
fn test_replace_mode_rewrites_table() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let pipeline = SingleTable::new(|| TableLoadConfig::new().with_mode(WriteMode::Replace));

    for _ in 0..3 {
        let report = run_once(&pipeline, &db, &path);
        assert_eq!(report.records_loaded.get("alpha"), Some(&2));
    }
    assert_eq!(db.count_rows("alpha").unwrap(), 2);
}

#[test]
fn test_fail_if_exists_mode_rejects_second_load() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let pipeline = SingleTable::new(|| TableLoadConfig::new().with_mode(WriteMode::FailIfExists));

    assert!(run_once(&pipeline, &db, &path).is_success());

    let second = run_once(&pipeline, &db, &path);
    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(second.records_loaded.get("alpha"), Some(&0));
    assert_eq!(
        second.errors,
        vec!["Failed to load alpha: Table already exists: alpha"]
    );
    assert_eq!(db.count_rows("alpha").unwrap(), 2);
}

#[test]
fn test_missing_dedup_key_rejects_table() {
    let dir = TempDir::new().unwrap();
    let path = sample(&dir);
    let db = DuckDbGateway::memory().unwrap();
    let pipeline = SingleTable::new(|| TableLoadConfig::new().dedup_on(&["id", "school_urn"]));

    let report = run_once(&pipeline, &db, &path);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.records_loaded.get("alpha"), Some(&0));
    assert_eq!(
        report.errors,
        vec!["Missing dedup key columns for alpha: [school_urn]"]
    );
    assert!(!db.table_exists("alpha").unwrap());
}
