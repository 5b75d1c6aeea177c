//! Pipeline registry
//!
//! Maps pipeline names to factories, picks a pipeline for a file from its path
//! and gives access to the audit ledger.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DatasetConfig;
use crate::database::DatabaseGateway;
use crate::loaders::{Ks4PerformancePipeline, OfstedInspectionsPipeline, SenStatisticsPipeline};
use crate::pipeline::{
    AuditLedger, AuditRecord, AuditSummary, Pipeline, PipelineError, PipelineOptions,
    PipelineReport, PipelineResult, PipelineRunner,
};

/// Builds a fresh pipeline instance per run
pub type PipelineFactory = Box<dyn Fn() -> Box<dyn Pipeline>>;

/// Path rules tried in order, most specific first: path substrings, file name
/// substrings, and the pipeline chosen on a match
const DETECTION_RULES: &[(&[&str], &[&str], &str)] = &[
    (&["key-stage-4"], &["performance_tables"], "ks4_performance"),
    (&["special-educational-needs"], &["sen_"], "sen_statistics"),
    (&["ofsted"], &["inspection"], "ofsted_inspections"),
    (&[], &["graduate", "labour"], "graduate_outcomes"),
];

/// Factory for a pipeline type with a default constructor
pub fn factory<P: Pipeline + Default + 'static>() -> PipelineFactory {
    Box::new(|| -> Box<dyn Pipeline> { Box::new(P::default()) })
}

/// Listing entry for a registered pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredPipeline {
    pub name: String,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}

struct Entry {
    description: String,
    registered_at: DateTime<Utc>,
    factory: PipelineFactory,
}

/// Named pipeline factories
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Entry>,
}

impl PipelineRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in loader
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "ks4_performance",
            "Key Stage 4 school performance tables",
            factory::<Ks4PerformancePipeline>(),
        );
        registry.register(
            "sen_statistics",
            "Special educational needs by local authority",
            factory::<SenStatisticsPipeline>(),
        );
        registry.register(
            "ofsted_inspections",
            "Ofsted state-funded school inspection outcomes",
            factory::<OfstedInspectionsPipeline>(),
        );
        registry
    }

    /// Register a pipeline; a later registration under the same name wins
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: PipelineFactory,
    ) {
        let name = name.into();
        let entry = Entry {
            description: description.into(),
            registered_at: Utc::now(),
            factory,
        };
        if self.pipelines.insert(name.clone(), entry).is_some() {
            debug!(pipeline = %name, "Replaced existing pipeline registration");
        } else {
            debug!(pipeline = %name, "Registered pipeline");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }

    /// Registered pipelines in name order
    pub fn list(&self) -> Vec<RegisteredPipeline> {
        self.pipelines
            .iter()
            .map(|(name, entry)| RegisteredPipeline {
                name: name.clone(),
                description: entry.description.clone(),
                registered_at: entry.registered_at,
            })
            .collect()
    }

    /// Guess the pipeline for a file from its path.
    ///
    /// May name a dataset that has no registered loader.
    pub fn detect(path: &Path) -> Option<&'static str> {
        let full = path.to_string_lossy().to_lowercase();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        DETECTION_RULES
            .iter()
            .find(|(in_path, in_name, _)| {
                in_path.iter().any(|s| full.contains(s))
                    || in_name.iter().any(|s| file_name.contains(s))
            })
            .map(|(_, _, name)| *name)
    }

    /// Run a named pipeline against a file
    pub fn run(
        &self,
        name: &str,
        path: &Path,
        options: PipelineOptions,
        config: &DatasetConfig,
        db: &dyn DatabaseGateway,
    ) -> PipelineResult<PipelineReport> {
        let entry = self
            .pipelines
            .get(name)
            .ok_or_else(|| PipelineError::NotFound {
                name: name.to_string(),
                available: self.names(),
            })?;

        let pipeline = (entry.factory)();
        info!(pipeline = name, file = %path.display(), "Running pipeline");
        Ok(PipelineRunner::new(pipeline.as_ref(), db, config, options).run(path))
    }

    /// Detect the pipeline for a file and run it.
    ///
    /// Returns `Ok(None)` when no pipeline matches the path.
    pub fn smart_run(
        &self,
        path: &Path,
        options: PipelineOptions,
        config: &DatasetConfig,
        db: &dyn DatabaseGateway,
    ) -> PipelineResult<Option<PipelineReport>> {
        let Some(name) = Self::detect(path) else {
            warn!(file = %path.display(), "Could not auto-detect pipeline");
            return Ok(None);
        };
        info!(pipeline = name, "Auto-detected pipeline");
        self.run(name, path, options, config, db).map(Some)
    }

    /// Recent audit records, newest first
    pub fn history(&self, db: &dyn DatabaseGateway, limit: usize) -> PipelineResult<Vec<AuditRecord>> {
        AuditLedger::new(db).history(limit)
    }

    /// Ledger totals plus the latest `recent` records
    pub fn summary(&self, db: &dyn DatabaseGateway, recent: usize) -> PipelineResult<AuditSummary> {
        AuditLedger::new(db).summary(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let detect = |p: &str| PipelineRegistry::detect(Path::new(p));
        assert_eq!(
            detect("data/dfe/key-stage-4-performance_2023-24/data/schools.csv"),
            Some("ks4_performance")
        );
        assert_eq!(
            detect("downloads/202324_performance_tables_schools_final.csv"),
            Some("ks4_performance")
        );
        assert_eq!(
            detect("data/dfe/special-educational-needs-in-england_2024-25/data/sen_ncyear_new_.csv"),
            Some("sen_statistics")
        );
        assert_eq!(detect("data/Ofsted/latest.csv"), Some("ofsted_inspections"));
        assert_eq!(detect("x/State_funded_school_Inspections.csv"), Some("ofsted_inspections"));
        assert_eq!(detect("x/graduate_outcomes.csv"), Some("graduate_outcomes"));
        assert_eq!(detect("data/random_file.csv"), None);
    }

    #[test]
    fn test_with_defaults_lists_loaders() {
        let registry = PipelineRegistry::with_defaults();
        let names: Vec<_> = registry.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["ks4_performance", "ofsted_inspections", "sen_statistics"]);
        assert!(!registry.contains("graduate_outcomes"));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = PipelineRegistry::with_defaults();
        registry.register(
            "ks4_performance",
            "replacement",
            factory::<Ks4PerformancePipeline>(),
        );
        let entry = registry
            .list()
            .into_iter()
            .find(|p| p.name == "ks4_performance")
            .unwrap();
        assert_eq!(entry.description, "replacement");
        assert_eq!(registry.names().len(), 3);
    }
}
