//! Dataset configuration
//!
//! Static knowledge about the source datasets: where their files live, how to
//! tag them with an academic year, which placeholder codes the DfE uses for
//! suppressed values and which ranges count as plausible for quality checks.
//!
//! The built-in defaults cover the published DfE and Ofsted layouts. A TOML
//! file can override any subset of them:
//!
//! ```toml
//! data_root = "/srv/education/data"
//! default_academic_year = "2024-25"
//!
//! [academic_years]
//! "202425" = "2024-25"
//!
//! [thresholds.progress_8]
//! min = -5.0
//! max = 5.0
//! ```

mod error;

pub use error::ConfigError;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Placeholder codes used in DfE statistical releases
pub const DEFAULT_SENTINEL_CODES: &[&str] =
    &["z", "c", "x", ".", "SUPP", "NE", "LOW", "HIGH", "LOWCOV"];

/// Academic year used when a file name carries no recognizable year
pub const DEFAULT_ACADEMIC_YEAR: &str = "2023-24";

static YEAR_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(20\d{2})[-_]?(\d{2})").expect("valid academic year regex"));

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Plausible value ranges for quality checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Unique Reference Number of an establishment
    pub urn: Range,
    pub percentage: Range,
    pub progress_8: Range,
    pub attainment_8: Range,
    pub ebacc_aps: Range,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            urn: Range::new(100_000.0, 9_999_999.0),
            percentage: Range::new(0.0, 100.0),
            progress_8: Range::new(-3.0, 3.0),
            attainment_8: Range::new(0.0, 90.0),
            ebacc_aps: Range::new(0.0, 9.0),
        }
    }
}

/// A source file discovered on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub academic_year: String,
}

impl DiscoveredFile {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Dataset discovery and quality configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory that file patterns are resolved against
    pub data_root: PathBuf,
    /// Dataset name to glob patterns, relative to `data_root`
    pub datasets: BTreeMap<String, Vec<String>>,
    /// Year codes found in file paths (e.g. `202324`) to academic year tags
    pub academic_years: BTreeMap<String, String>,
    pub default_academic_year: String,
    pub sentinel_codes: Vec<String>,
    pub thresholds: QualityThresholds,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let datasets = [
            (
                "ks4_performance",
                &[
                    "**/key-stage-4-performance*/**/*performance_tables*schools*.csv",
                    "**/ks4*/**/*performance*.csv",
                ][..],
            ),
            (
                "sen_statistics",
                &[
                    "**/special-educational-needs*/**/*sen*.csv",
                    "**/special-educational-needs*/**/*sen*.ods",
                ][..],
            ),
            (
                "ofsted_inspections",
                &[
                    "**/ofsted*/**/*inspection*.csv",
                    "**/maintained-schools*/**/*inspection*.csv",
                ][..],
            ),
            (
                "graduate_outcomes",
                &[
                    "**/graduate-labour-markets*/**/*.csv",
                    "**/longer-term-destinations*/**/*.csv",
                ][..],
            ),
        ]
        .into_iter()
        .map(|(name, patterns)| {
            (
                name.to_string(),
                patterns.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect();

        let academic_years = [
            ("202324", "2023-24"),
            ("202223", "2022-23"),
            ("202122", "2021-22"),
        ]
        .into_iter()
        .map(|(code, year)| (code.to_string(), year.to_string()))
        .collect();

        Self {
            data_root: PathBuf::from("data"),
            datasets,
            academic_years,
            default_academic_year: DEFAULT_ACADEMIC_YEAR.to_string(),
            sentinel_codes: DEFAULT_SENTINEL_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            thresholds: QualityThresholds::default(),
        }
    }
}

impl DatasetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file; keys it omits keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DatasetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the data root
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    /// Check ranges and patterns for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (name, range) in [
            ("thresholds.urn", t.urn),
            ("thresholds.percentage", t.percentage),
            ("thresholds.progress_8", t.progress_8),
            ("thresholds.attainment_8", t.attainment_8),
            ("thresholds.ebacc_aps", t.ebacc_aps),
        ] {
            if range.min > range.max {
                return Err(ConfigError::invalid(
                    name,
                    format!("min {} is greater than max {}", range.min, range.max),
                ));
            }
        }

        for pattern in self.datasets.values().flatten() {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Names of all configured datasets
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn patterns(&self, dataset: &str) -> Option<&[String]> {
        self.datasets.get(dataset).map(Vec::as_slice)
    }

    /// Tag a file path with its academic year.
    ///
    /// Known year codes win; otherwise a `YYYYYY` or `YYYY-YY` span whose
    /// second half follows the first is used, falling back to the default.
    pub fn detect_academic_year(&self, path: &Path) -> String {
        let path_str = path.to_string_lossy();

        for (code, year) in &self.academic_years {
            if path_str.contains(code.as_str()) {
                return year.clone();
            }
        }

        for caps in YEAR_CODE.captures_iter(&path_str) {
            let (Ok(start), Ok(end)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
                continue;
            };
            if (start + 1) % 100 == end {
                return format!("{start}-{end:02}");
            }
        }

        self.default_academic_year.clone()
    }

    /// All files matching a dataset's patterns, sorted and without duplicates
    pub fn discover_files(&self, dataset: &str) -> Result<Vec<DiscoveredFile>, ConfigError> {
        let Some(patterns) = self.patterns(dataset) else {
            return Err(ConfigError::invalid(
                "dataset",
                format!("unknown dataset '{dataset}'"),
            ));
        };

        let mut paths = BTreeSet::new();
        for pattern in patterns {
            let full = self.data_root.join(pattern);
            let full = full.to_string_lossy();
            let entries = glob::glob(&full).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            paths.extend(entries.filter_map(Result::ok).filter(|p| p.is_file()));
        }

        debug!(dataset, files = paths.len(), "Discovered source files");

        Ok(paths
            .into_iter()
            .map(|path| {
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let academic_year = self.detect_academic_year(&path);
                DiscoveredFile {
                    path,
                    size_bytes,
                    academic_year,
                }
            })
            .collect())
    }

    /// The most comprehensive (largest) file for a dataset
    pub fn latest_file(&self, dataset: &str) -> Result<Option<DiscoveredFile>, ConfigError> {
        Ok(self
            .discover_files(dataset)?
            .into_iter()
            .max_by_key(|f| f.size_bytes))
    }
}
