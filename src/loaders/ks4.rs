//! Key Stage 4 performance tables

use std::path::Path;

use tracing::{debug, info};

use super::{ensure_columns, fill, keep_level, require_column};
use crate::cleaning::{
    NumericKind, clamp_percentages, clamp_range, coerce_numeric, filter_valid_identifiers,
};
use crate::pipeline::{
    LoadConfig, Pipeline, PipelineResult, SourceInfo, TableLoadConfig, TransformContext,
    TransformedData, filter_to_existing,
};
use crate::run_log::RunLog;
use crate::source::read_csv;
use crate::table::{Table, Value};

const SCHOOL_NAME_MAX_CHARS: usize = 200;

const SCHOOL_COLUMNS: &[(&str, &str)] = &[
    ("school_urn", "urn"),
    ("school_name", "school_name"),
    ("new_la_code", "local_authority_code"),
];

const PERFORMANCE_COLUMNS: &[(&str, &str)] = &[
    ("school_urn", "urn"),
    ("avg_att8", "attainment_8_score"),
    ("avg_p8score", "progress_8_score"),
    ("avg_ebaccaps", "ebacc_average_point_score"),
    ("pt_ebacc_95", "ebacc_entries_percentage"),
    ("pt_l2basics_95", "grade_5_english_maths_percentage"),
    ("pt_l2basics_94", "grade_4_english_maths_percentage"),
    ("t_pupils", "total_pupils"),
    ("t_inp8calc", "pupils_included_progress_8"),
    ("t_att8", "pupils_included_attainment_8"),
];

const SCORE_COLUMNS: &[&str] = &[
    "attainment_8_score",
    "progress_8_score",
    "ebacc_average_point_score",
];

const PERCENTAGE_COLUMNS: &[&str] = &[
    "ebacc_entries_percentage",
    "grade_5_english_maths_percentage",
    "grade_4_english_maths_percentage",
];

const COUNT_COLUMNS: &[&str] = &[
    "total_pupils",
    "pupils_included_progress_8",
    "pupils_included_attainment_8",
];

/// School-level KS4 results: loads `schools` and `school_performance`
#[derive(Debug, Default, Clone, Copy)]
pub struct Ks4PerformancePipeline;

impl Ks4PerformancePipeline {
    pub fn new() -> Self {
        Self
    }

    fn schools(&self, grouped: &Table, ctx: &TransformContext, log: &mut RunLog) -> Table {
        let (mut schools, _) = grouped.project(SCHOOL_COLUMNS);
        ensure_columns(&mut schools, &["school_name", "local_authority_code"]);

        schools.map_column("school_name", |v| match v.as_str().map(str::trim) {
            Some(name) if !name.is_empty() => {
                Value::Text(name.chars().take(SCHOOL_NAME_MAX_CHARS).collect())
            }
            _ => Value::text("Unknown School"),
        });
        fill(&mut schools, "school_type_code", Value::Null);
        fill(&mut schools, "phase", Value::text("Secondary"));
        fill(&mut schools, "is_active", Value::Bool(true));

        filter_valid_identifiers(&mut schools, "urn", ctx.thresholds.urn, log);
        info!(rows = schools.len(), "Transformed school records");
        schools
    }

    fn performance(&self, grouped: &Table, ctx: &TransformContext, log: &mut RunLog) -> Table {
        let (mut perf, missing) = grouped.project(PERFORMANCE_COLUMNS);
        if !missing.is_empty() {
            debug!(?missing, "Performance measures absent from source");
        }
        let destinations: Vec<&str> = PERFORMANCE_COLUMNS.iter().map(|(_, d)| *d).collect();
        ensure_columns(&mut perf, &destinations);

        fill(&mut perf, "academic_year", Value::text(ctx.academic_year.clone()));
        fill(&mut perf, "key_stage", Value::text("KS4"));

        let codes = &ctx.sentinel_codes;
        for column in SCORE_COLUMNS.iter().chain(PERCENTAGE_COLUMNS) {
            coerce_numeric(&mut perf, column, NumericKind::Float, codes);
        }
        for column in COUNT_COLUMNS {
            coerce_numeric(&mut perf, column, NumericKind::Integer, codes);
        }

        filter_valid_identifiers(&mut perf, "urn", ctx.thresholds.urn, log);
        clamp_percentages(&mut perf, PERCENTAGE_COLUMNS, ctx.thresholds.percentage, log);
        clamp_range(&mut perf, "attainment_8_score", ctx.thresholds.attainment_8, log);
        clamp_range(&mut perf, "progress_8_score", ctx.thresholds.progress_8, log);
        clamp_range(&mut perf, "ebacc_average_point_score", ctx.thresholds.ebacc_aps, log);

        info!(rows = perf.len(), "Transformed performance records");
        perf
    }
}

impl Pipeline for Ks4PerformancePipeline {
    fn name(&self) -> &str {
        "ks4_performance"
    }

    fn source(&self) -> SourceInfo {
        SourceInfo::new("DfE Key Stage 4 Performance Tables").with_url(
            "https://explore-education-statistics.service.gov.uk/find-statistics/key-stage-4-performance",
        )
    }

    fn extract(&self, path: &Path, _log: &mut RunLog) -> PipelineResult<Table> {
        let mut raw = read_csv(path)?;
        if raw.has_column("geographic_level") {
            let removed = keep_level(&mut raw, "geographic_level", "School");
            info!(rows = raw.len(), removed, "Filtered to school-level records");
        }
        Ok(raw)
    }

    fn transform(
        &self,
        raw: &Table,
        ctx: &TransformContext,
        log: &mut RunLog,
    ) -> PipelineResult<TransformedData> {
        require_column(raw, "school_urn")?;
        let grouped = raw.first_per_key("school_urn");
        debug!(raw = raw.len(), schools = grouped.len(), "Grouped rows by school");

        Ok(TransformedData::new()
            .with("schools", self.schools(&grouped, ctx, log))
            .with("school_performance", self.performance(&grouped, ctx, log)))
    }

    fn load_config(&self) -> LoadConfig {
        LoadConfig::new()
            .table("schools", TableLoadConfig::new().dedup_on(&["urn"]))
            .table(
                "school_performance",
                TableLoadConfig::new()
                    .dedup_on(&["urn", "academic_year", "key_stage"])
                    .with_pre_load(filter_to_existing("schools", "urn")),
            )
    }
}
