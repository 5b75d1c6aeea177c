//! Append-only audit ledger of pipeline runs
//!
//! One row per run lands in `data_sources`, success or failure. Rows are never
//! updated or deleted. Timestamps are stored as RFC 3339 text so the same DDL
//! works on every backend.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{PipelineError, PipelineResult};
use crate::database::{DatabaseGateway, WriteMode};
use crate::table::{Table, Value};

/// Ledger table name
pub const AUDIT_TABLE: &str = "data_sources";

const CREATE_AUDIT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS data_sources (
    id BIGINT PRIMARY KEY,
    source_name VARCHAR NOT NULL,
    source_url VARCHAR,
    file_name VARCHAR,
    download_date DATE,
    academic_year VARCHAR,
    records_loaded BIGINT NOT NULL DEFAULT 0,
    load_status VARCHAR NOT NULL,
    error_message VARCHAR,
    created_at VARCHAR NOT NULL
);
"#;

const AUDIT_COLUMNS: &str = "id, source_name, source_url, file_name, download_date, \
    academic_year, records_loaded, load_status, error_message, created_at";

/// Load outcome stored in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Success,
    Failed,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStatus::Success => write!(f, "success"),
            LoadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(LoadStatus::Success),
            "failed" => Ok(LoadStatus::Failed),
            _ => Err(format!("Invalid load status: {}", s)),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Assigned on append
    pub id: i64,
    pub source_name: String,
    pub source_url: Option<String>,
    pub file_name: Option<String>,
    pub download_date: Option<NaiveDate>,
    pub academic_year: Option<String>,
    pub records_loaded: i64,
    pub load_status: LoadStatus,
    /// Run errors joined with `"; "`
    pub error_message: Option<String>,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl AuditRecord {
    /// New record stamped with today's date and the current time
    pub fn new(source_name: impl Into<String>, load_status: LoadStatus) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            source_name: source_name.into(),
            source_url: None,
            file_name: None,
            download_date: Some(now.date_naive()),
            academic_year: None,
            records_loaded: 0,
            load_status,
            error_message: None,
            created_at: now.to_rfc3339(),
        }
    }

    fn to_table(&self) -> Table {
        Table::from_rows(
            [
                "id",
                "source_name",
                "source_url",
                "file_name",
                "download_date",
                "academic_year",
                "records_loaded",
                "load_status",
                "error_message",
                "created_at",
            ],
            vec![vec![
                Value::Int(self.id),
                Value::text(self.source_name.clone()),
                self.source_url.clone().into(),
                self.file_name.clone().into(),
                self.download_date.into(),
                self.academic_year.clone().into(),
                Value::Int(self.records_loaded),
                Value::text(self.load_status.to_string()),
                self.error_message.clone().into(),
                Value::text(self.created_at.clone()),
            ]],
        )
    }

    fn from_row(table: &Table, row: usize) -> Option<Self> {
        let text = |col: &str| {
            table
                .value(row, col)
                .filter(|v| !v.is_null())
                .map(|v| v.to_string())
        };
        let date = |col: &str| match table.value(row, col) {
            Some(Value::Date(d)) => Some(*d),
            Some(Value::Text(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        };

        Some(Self {
            id: table.value(row, "id")?.as_i64()?,
            source_name: text("source_name").unwrap_or_default(),
            source_url: text("source_url"),
            file_name: text("file_name"),
            download_date: date("download_date"),
            academic_year: text("academic_year"),
            records_loaded: table
                .value(row, "records_loaded")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            load_status: text("load_status")?.parse().ok()?,
            error_message: text("error_message"),
            created_at: text("created_at").unwrap_or_default(),
        })
    }
}

/// Aggregate view over the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total_records: i64,
    pub total_loads: i64,
    pub successful_loads: i64,
    pub recent: Vec<AuditRecord>,
}

impl AuditSummary {
    /// Successful loads as a percentage of all loads
    pub fn success_rate(&self) -> f64 {
        if self.total_loads == 0 {
            0.0
        } else {
            self.successful_loads as f64 * 100.0 / self.total_loads as f64
        }
    }
}

/// Reader and appender for the `data_sources` ledger
pub struct AuditLedger<'a> {
    db: &'a dyn DatabaseGateway,
}

impl<'a> AuditLedger<'a> {
    pub fn new(db: &'a dyn DatabaseGateway) -> Self {
        Self { db }
    }

    /// Create the ledger table when missing
    pub fn init(&self) -> PipelineResult<()> {
        self.db
            .execute(CREATE_AUDIT_TABLE)
            .map_err(|e| PipelineError::Audit(e.to_string()))
    }

    fn next_id(&self) -> PipelineResult<i64> {
        let result = self
            .db
            .read(
                "SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM data_sources",
                &[],
            )
            .map_err(|e| PipelineError::Audit(e.to_string()))?;
        Ok(result
            .value(0, "next_id")
            .and_then(Value::as_i64)
            .unwrap_or(1))
    }

    /// Append a record, returning it with its assigned id
    pub fn append(&self, mut record: AuditRecord) -> PipelineResult<AuditRecord> {
        self.init()?;
        record.id = self.next_id()?;
        self.db
            .write(&record.to_table(), AUDIT_TABLE, WriteMode::Append)
            .map_err(|e| PipelineError::Audit(e.to_string()))?;
        debug!(id = record.id, status = %record.load_status, "Appended audit record");
        Ok(record)
    }

    /// Most recent records first; an absent ledger is an empty history
    pub fn history(&self, limit: usize) -> PipelineResult<Vec<AuditRecord>> {
        if !self.db.table_exists(AUDIT_TABLE)? {
            return Ok(Vec::new());
        }
        let result = self
            .db
            .read(
                &format!("SELECT {AUDIT_COLUMNS} FROM data_sources ORDER BY id DESC LIMIT {limit}"),
                &[],
            )
            .map_err(|e| PipelineError::Audit(e.to_string()))?;
        Ok((0..result.len())
            .filter_map(|row| AuditRecord::from_row(&result, row))
            .collect())
    }

    /// Totals over the whole ledger plus the `recent` latest records
    pub fn summary(&self, recent: usize) -> PipelineResult<AuditSummary> {
        if !self.db.table_exists(AUDIT_TABLE)? {
            return Ok(AuditSummary {
                total_records: 0,
                total_loads: 0,
                successful_loads: 0,
                recent: Vec::new(),
            });
        }

        let totals = self
            .db
            .read(
                "SELECT CAST(COALESCE(SUM(records_loaded), 0) AS BIGINT) AS total_records, \
                 COUNT(*) AS total_loads, \
                 CAST(COALESCE(SUM(CASE WHEN load_status = 'success' THEN 1 ELSE 0 END), 0) AS BIGINT) \
                 AS successful_loads \
                 FROM data_sources",
                &[],
            )
            .map_err(|e| PipelineError::Audit(e.to_string()))?;
        let get = |col: &str| totals.value(0, col).and_then(Value::as_i64).unwrap_or(0);

        Ok(AuditSummary {
            total_records: get("total_records"),
            total_loads: get("total_loads"),
            successful_loads: get("successful_loads"),
            recent: self.history(recent)?,
        })
    }
}

#[cfg(all(test, feature = "duckdb-backend"))]
mod tests {
    use super::*;
    use crate::database::DuckDbGateway;

    fn record(status: LoadStatus, loaded: i64) -> AuditRecord {
        let mut r = AuditRecord::new("DfE Key Stage 4 Performance Tables", status);
        r.file_name = Some("ks4.csv".to_string());
        r.academic_year = Some("2023-24".to_string());
        r.records_loaded = loaded;
        if status == LoadStatus::Failed {
            r.error_message = Some("Empty dataset for schools; boom".to_string());
        }
        r
    }

    #[test]
    fn test_history_empty_without_table() {
        let db = DuckDbGateway::memory().unwrap();
        let ledger = AuditLedger::new(&db);
        assert!(ledger.history(10).unwrap().is_empty());
        assert_eq!(ledger.summary(10).unwrap().total_loads, 0);
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let db = DuckDbGateway::memory().unwrap();
        let ledger = AuditLedger::new(&db);

        let first = ledger.append(record(LoadStatus::Success, 10)).unwrap();
        let second = ledger.append(record(LoadStatus::Failed, 0)).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let history = ledger.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, 2);
        assert_eq!(history[0].load_status, LoadStatus::Failed);
        assert_eq!(
            history[0].error_message.as_deref(),
            Some("Empty dataset for schools; boom")
        );
        assert_eq!(history[1], first);
    }

    #[test]
    fn test_summary() {
        let db = DuckDbGateway::memory().unwrap();
        let ledger = AuditLedger::new(&db);
        ledger.append(record(LoadStatus::Success, 10)).unwrap();
        ledger.append(record(LoadStatus::Success, 5)).unwrap();
        ledger.append(record(LoadStatus::Failed, 0)).unwrap();
        ledger.append(record(LoadStatus::Failed, 0)).unwrap();

        let summary = ledger.summary(3).unwrap();
        assert_eq!(summary.total_records, 15);
        assert_eq!(summary.total_loads, 4);
        assert_eq!(summary.successful_loads, 2);
        assert_eq!(summary.success_rate(), 50.0);
        assert_eq!(summary.recent.len(), 3);
    }
}
