//! Pipeline configuration
//!
//! Every knob the core uses is carried in an explicit `PipelineConfig` that
//! callers pass into the entry points. Configs load from TOML; every section
//! has defaults, so an empty document is a valid configuration.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ComputeError;
use crate::types::{Aggregation, Column, SourceKind};

/// mmol/L to mg/dL conversion factor
pub const MMOL_TO_MGDL: f64 = 18.016;

/// Longest accepted rolling insulin window, in days
pub const MAX_ROLLING_DAYS: u32 = 366;

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    pub range: RangeConfig,
    pub cutover: Vec<CutoverRule>,
    pub insulin: InsulinConfig,
    pub split: SplitConfig,
    pub gaps: GapConfig,
    pub forecast: ForecastConfig,
    pub sources: Vec<SourceFile>,
}

/// Grid and aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Resampling bin width in minutes
    pub bin_minutes: u32,
    /// Calories are intake-like (sum) or activity-rate-like (mean)
    pub calories: Aggregation,
    /// Identical readings this close together collapse to one
    pub duplicate_tolerance_secs: i64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            bin_minutes: 15,
            calories: Aggregation::Sum,
            duplicate_tolerance_secs: 0,
        }
    }
}

/// Optional inclusive time range applied after fusion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// Device switch: values from `superseded` at or after `at` are unknown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoverRule {
    pub superseded: SourceKind,
    pub at: NaiveDateTime,
    #[serde(default = "default_cutover_columns")]
    pub columns: Vec<Column>,
}

fn default_cutover_columns() -> Vec<Column> {
    vec![
        Column::RapidInsulin,
        Column::LongInsulin,
        Column::Carbohydrates,
    ]
}

impl CutoverRule {
    pub fn new(superseded: SourceKind, at: NaiveDateTime) -> Self {
        Self {
            superseded,
            at,
            columns: default_cutover_columns(),
        }
    }
}

/// Insulin action curve and rolling-total settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsulinConfig {
    /// Total action duration of rapid insulin (minutes)
    pub action_minutes: f64,
    /// Time to peak activity (minutes)
    pub peak_minutes: f64,
    /// Trailing window of the rolling rapid-insulin total (days)
    pub rolling_days: u32,
}

impl Default for InsulinConfig {
    fn default() -> Self {
        Self {
            action_minutes: 300.0,
            peak_minutes: 55.0,
            rolling_days: 6,
        }
    }
}

/// Chronological split fractions; test takes the remainder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train: f64,
    pub validation: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train: 0.7,
            validation: 0.2,
        }
    }
}

/// Gap interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    Linear,
    /// Second-order polynomial through neighbouring known points
    #[serde(alias = "polynomial", alias = "spline")]
    Quadratic,
}

/// Gap handling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    pub method: InterpolationMethod,
    /// Interior gaps longer than this many bins are left missing
    pub max_gap_bins: Option<usize>,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::Linear,
            max_gap_bins: None,
        }
    }
}

/// Unit of served predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseUnit {
    Mgdl,
    Mmol,
}

/// Forecast window contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Timesteps per model window
    pub window_len: usize,
    /// Bins between the last window row and the glucose target
    pub horizon_bins: usize,
    /// Feature channels, in model order
    pub channels: Vec<Column>,
    pub output_unit: GlucoseUnit,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            window_len: 20,
            horizon_bins: 8,
            channels: vec![
                Column::Glucose,
                Column::InsulinOnBoard,
                Column::Carbohydrates,
            ],
            output_unit: GlucoseUnit::Mgdl,
        }
    }
}

/// Export format tag for a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    LibreTsv,
    MySugrCsv,
    FitbitHeartRate,
    FitbitCalories,
    FitbitDistance,
}

/// One input file referenced by the config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub format: SourceFormat,
    pub path: PathBuf,
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ComputeError> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// Relative source paths are resolved against the file's directory.
    pub fn from_path(path: &Path) -> Result<Self, ComputeError> {
        let raw = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(dir) = path.parent() {
            for source in &mut config.sources {
                if source.path.is_relative() {
                    source.path = dir.join(&source.path);
                }
            }
        }
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ComputeError> {
        toml::to_string_pretty(self).map_err(|e| ComputeError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.sampling.bin_minutes == 0 {
            return Err(invalid("sampling.bin_minutes must be > 0"));
        }
        if self.sampling.duplicate_tolerance_secs < 0 {
            return Err(invalid("sampling.duplicate_tolerance_secs must be >= 0"));
        }
        if let (Some(start), Some(end)) = (self.range.start, self.range.end) {
            if start > end {
                return Err(invalid("range.start must not be after range.end"));
            }
        }

        let td = self.insulin.action_minutes;
        let tp = self.insulin.peak_minutes;
        if !(td > 0.0) {
            return Err(invalid("insulin.action_minutes must be > 0"));
        }
        // tau is only finite and positive while the peak sits in the first half
        if !(tp > 0.0 && tp < td / 2.0) {
            return Err(invalid(
                "insulin.peak_minutes must be > 0 and < action_minutes / 2",
            ));
        }
        if !(1..=MAX_ROLLING_DAYS).contains(&self.insulin.rolling_days) {
            return Err(invalid(&format!(
                "insulin.rolling_days must be in 1..={MAX_ROLLING_DAYS}"
            )));
        }

        let split = &self.split;
        if !(split.train > 0.0 && split.validation > 0.0) {
            return Err(invalid("split fractions must be > 0"));
        }
        if split.train + split.validation >= 1.0 {
            return Err(invalid("split.train + split.validation must be < 1"));
        }

        if self.forecast.window_len == 0 {
            return Err(invalid("forecast.window_len must be > 0"));
        }
        if self.forecast.channels.is_empty() {
            return Err(invalid("forecast.channels must not be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ComputeError {
    ComputeError::InvalidConfig(msg.to_string())
}
