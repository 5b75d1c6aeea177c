//! Special educational needs statistics

use std::path::Path;

use tracing::info;

use super::{drop_totals, fill, keep_level, require_column};
use crate::cleaning::{NumericKind, coerce_numeric, drop_null_rows};
use crate::pipeline::{
    LoadConfig, Pipeline, PipelineResult, SourceInfo, TableLoadConfig, TransformContext,
    TransformedData,
};
use crate::run_log::RunLog;
use crate::source::read_csv;
use crate::table::{Table, Value};

/// Publication wording of `sen_status` to provision category
const SEN_PROVISION: &[(&str, &str)] = &[
    ("No identified SEN", "No SEN"),
    ("SEN support / SEN without an EHC plan", "SEN Support"),
    ("Education, Health and Care plans", "EHC Plan"),
];

/// Publication wording of `sen_primary_need` to need code
const PRIMARY_NEED: &[(&str, &str)] = &[
    ("Autistic Spectrum Disorder", "ASD"),
    ("Hearing Impairment", "HI"),
    ("Moderate Learning Difficulty", "MLD"),
    ("Other difficulty or disability", "OTH"),
    ("Physical Disability", "PD"),
    ("Profound & Multiple Learning Difficulty", "PMLD"),
    ("Social, Emotional and Mental Health", "SEMH"),
    ("Speech, Language and Communications needs", "SLCN"),
    ("Visual Impairment", "VI"),
    ("Multi-sensory impairment", "MSI"),
    ("Severe Learning Difficulty", "SLD"),
    ("Specific Learning Difficulty", "SPLD"),
    ("SEN support but no specialist assessment of type of need", "NSA"),
    ("Downs Syndrome", "OTH"),
];

fn lookup(table: &[(&str, &str)], value: &Value) -> Value {
    value
        .as_str()
        .map(str::trim)
        .and_then(|s| table.iter().find(|(from, _)| *from == s))
        .map(|(_, to)| Value::text(*to))
        .unwrap_or(Value::Null)
}

/// Local-authority SEN counts: loads `local_authorities` and `sen_pupils`
#[derive(Debug, Default, Clone, Copy)]
pub struct SenStatisticsPipeline;

impl SenStatisticsPipeline {
    pub fn new() -> Self {
        Self
    }

    fn local_authorities(&self, raw: &Table) -> Table {
        let (mut las, _) = raw.project(&[("new_la_code", "la_code"), ("la_name", "la_name")]);
        las.retain_rows(|row| row.iter().all(|v| !v.is_null()));
        las.dedup(&[]);
        // TODO: map each authority to its government office region
        fill(&mut las, "region", Value::text("England"));
        las
    }

    fn sen_pupils(&self, raw: &Table, ctx: &TransformContext, log: &mut RunLog) -> Table {
        let (mut pupils, _) = raw.project(&[
            ("new_la_code", "la_code"),
            ("sen_status", "sen_provision"),
            ("sen_primary_need", "primary_need_code"),
            ("number_of_pupils", "pupil_count"),
        ]);
        if !pupils.has_column("pupil_count") {
            fill(&mut pupils, "pupil_count", Value::Null);
        }

        pupils.map_column("sen_provision", |v| lookup(SEN_PROVISION, v));
        pupils.map_column("primary_need_code", |v| lookup(PRIMARY_NEED, v));
        fill(&mut pupils, "academic_year", Value::text(ctx.academic_year.clone()));

        coerce_numeric(&mut pupils, "pupil_count", NumericKind::Integer, &ctx.sentinel_codes);
        pupils.map_column("pupil_count", |v| match v {
            Value::Null => Value::Int(0),
            other => other.clone(),
        });

        drop_null_rows(&mut pupils, "la_code", log, "a local authority code");
        drop_null_rows(&mut pupils, "sen_provision", log, "a recognised SEN status");
        let empty = pupils.retain_where("pupil_count", |v| v.as_i64().is_some_and(|n| n > 0));
        info!(removed = empty, "Dropped rows without pupils");
        drop_null_rows(&mut pupils, "primary_need_code", log, "a recognised primary need");

        info!(rows = pupils.len(), "Transformed SEN pupil records");
        pupils
    }
}

impl Pipeline for SenStatisticsPipeline {
    fn name(&self) -> &str {
        "sen_statistics"
    }

    fn source(&self) -> SourceInfo {
        SourceInfo::new("DfE Special Educational Needs Statistics").with_url(
            "https://explore-education-statistics.service.gov.uk/find-statistics/special-educational-needs-in-england",
        )
    }

    fn extract(&self, path: &Path, _log: &mut RunLog) -> PipelineResult<Table> {
        let mut raw = read_csv(path)?;
        let other_levels = keep_level(&mut raw, "geographic_level", "Local authority");
        let totals = drop_totals(&mut raw, "sen_status") + drop_totals(&mut raw, "sen_primary_need");
        info!(rows = raw.len(), other_levels, totals, "Filtered to local authority rows");
        Ok(raw)
    }

    fn transform(
        &self,
        raw: &Table,
        ctx: &TransformContext,
        log: &mut RunLog,
    ) -> PipelineResult<TransformedData> {
        require_column(raw, "new_la_code")?;
        require_column(raw, "sen_status")?;
        require_column(raw, "sen_primary_need")?;

        Ok(TransformedData::new()
            .with("local_authorities", self.local_authorities(raw))
            .with("sen_pupils", self.sen_pupils(raw, ctx, log)))
    }

    fn load_config(&self) -> LoadConfig {
        LoadConfig::new()
            .table("local_authorities", TableLoadConfig::new().dedup_on(&["la_code"]))
            .table("sen_pupils", TableLoadConfig::new())
    }
}
