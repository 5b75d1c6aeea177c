//! Run reports

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub pipeline: String,
    pub file_name: String,
    pub academic_year: String,
    pub status: RunStatus,
    /// Rows written per destination table
    pub records_loaded: BTreeMap<String, usize>,
    pub total_records: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    /// Nothing was written; counts are what would have been written
    pub dry_run: bool,
}

impl PipelineReport {
    /// Check if the run was successful
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else if secs > 0 {
            format!("{}.{}s", secs, (self.duration_ms % 1000) / 100)
        } else {
            format!("{}ms", self.duration_ms)
        }
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("Pipeline {} ({}) - {}", self.pipeline, self.run_id, self.status);
        if self.dry_run {
            eprintln!("DRY RUN - nothing was written");
        }
        eprintln!("File: {}", self.file_name);
        eprintln!("Academic year: {}", self.academic_year);
        eprintln!("Duration: {}", self.duration_formatted());

        if !self.records_loaded.is_empty() {
            eprintln!("Records loaded:");
            for (table, count) in &self.records_loaded {
                eprintln!("  {:<24} {:>8}", table, count);
            }
        }
        eprintln!("Total records: {}", self.total_records);

        if !self.warnings.is_empty() {
            eprintln!();
            eprintln!("Warnings ({}):", self.warnings.len());
            for warning in &self.warnings {
                eprintln!("  - {}", warning);
            }
        }

        if !self.errors.is_empty() {
            eprintln!();
            eprintln!("Errors ({}):", self.errors.len());
            for error in &self.errors {
                eprintln!("  - {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(duration_ms: u64) -> PipelineReport {
        let now = Utc::now();
        PipelineReport {
            run_id: "run-1".to_string(),
            pipeline: "ks4_performance".to_string(),
            file_name: "ks4.csv".to_string(),
            academic_year: "2023-24".to_string(),
            status: RunStatus::Succeeded,
            records_loaded: BTreeMap::new(),
            total_records: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            start_time: now,
            end_time: now,
            duration_ms,
            dry_run: false,
        }
    }

    #[test]
    fn test_duration_formatted() {
        assert_eq!(report(250).duration_formatted(), "250ms");
        assert_eq!(report(2_500).duration_formatted(), "2.5s");
        assert_eq!(report(125_000).duration_formatted(), "2m 5s");
    }

    #[test]
    fn test_serializes_status_lowercase() {
        let json = serde_json::to_value(report(0)).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert!(report(0).is_success());
    }
}
