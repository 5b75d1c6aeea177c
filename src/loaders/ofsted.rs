//! Ofsted state-funded school inspections

use std::path::Path;

use tracing::{debug, info};

use super::map_columns;
use crate::cleaning::{
    NumericKind, coerce_numeric, drop_null_rows, filter_valid_identifiers, parse_uk_dates,
    truncate_text,
};
use crate::pipeline::{
    LoadConfig, Pipeline, PipelineResult, SourceInfo, TableLoadConfig, TransformContext,
    TransformedData, filter_to_existing,
};
use crate::run_log::RunLog;
use crate::source::read_csv;
use crate::table::{Table, Value};

const COLUMN_MAPPING: &[(&str, &str)] = &[
    ("URN", "urn"),
    ("Inspection start date", "inspection_date"),
    ("Publication date", "publication_date"),
    ("Inspection type", "inspection_type"),
    ("Overall effectiveness", "overall_effectiveness"),
    ("Quality of education", "quality_of_education"),
    ("Behaviour and attitudes", "behaviour_and_attitudes"),
    ("Personal development", "personal_development"),
    ("Effectiveness of leadership and management", "leadership_and_management"),
    ("Previous inspection start date", "previous_inspection_date"),
    ("Previous graded inspection overall effectiveness", "previous_overall_rating"),
];

const DATE_COLUMNS: &[&str] = &["inspection_date", "publication_date", "previous_inspection_date"];

const RATING_COLUMNS: &[&str] = &[
    "overall_effectiveness",
    "quality_of_education",
    "behaviour_and_attitudes",
    "personal_development",
    "leadership_and_management",
    "previous_overall_rating",
];

/// Rating code meaning "not applicable"
const RATING_NOT_APPLICABLE: i64 = 9;

const INSPECTION_TYPE_MAX_CHARS: usize = 50;

/// Inspection outcomes: loads `ofsted_inspections`
#[derive(Debug, Default, Clone, Copy)]
pub struct OfstedInspectionsPipeline;

impl OfstedInspectionsPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl Pipeline for OfstedInspectionsPipeline {
    fn name(&self) -> &str {
        "ofsted_inspections"
    }

    fn source(&self) -> SourceInfo {
        SourceInfo::new("Ofsted State-funded Schools Inspections and Outcomes")
    }

    fn extract(&self, path: &Path, _log: &mut RunLog) -> PipelineResult<Table> {
        Ok(read_csv(path)?)
    }

    fn transform(
        &self,
        raw: &Table,
        ctx: &TransformContext,
        log: &mut RunLog,
    ) -> PipelineResult<TransformedData> {
        let mut inspections = map_columns(raw, COLUMN_MAPPING, log)?;
        debug!(columns = ?inspections.columns(), "Mapped inspection columns");

        let unparsed = parse_uk_dates(&mut inspections, DATE_COLUMNS);
        if unparsed > 0 {
            debug!(unparsed, "Dates that could not be parsed were nulled");
        }

        filter_valid_identifiers(&mut inspections, "urn", ctx.thresholds.urn, log);

        for column in RATING_COLUMNS {
            coerce_numeric(&mut inspections, column, NumericKind::Integer, &ctx.sentinel_codes);
            inspections.map_column(column, |v| match v {
                Value::Int(RATING_NOT_APPLICABLE) => Value::Null,
                other => other.clone(),
            });
        }

        truncate_text(&mut inspections, "inspection_type", INSPECTION_TYPE_MAX_CHARS);
        drop_null_rows(&mut inspections, "inspection_date", log, "an inspection date");

        info!(rows = inspections.len(), "Transformed inspection records");
        Ok(TransformedData::new().with("ofsted_inspections", inspections))
    }

    fn load_config(&self) -> LoadConfig {
        LoadConfig::new().table(
            "ofsted_inspections",
            TableLoadConfig::new()
                .dedup_on(&["urn", "inspection_date"])
                .with_pre_load(filter_to_existing("schools", "urn")),
        )
    }
}
