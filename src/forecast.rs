//! Forecast consumer contract
//!
//! The sequence model is opaque: it takes a fixed-length window of normalized
//! feature rows and returns one normalized glucose value. This module builds
//! those windows, maps the model output back to physical units through the
//! fitted scaler, and attaches an action recommendation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::config::{ForecastConfig, GlucoseUnit, PipelineConfig, MMOL_TO_MGDL};
use crate::error::ComputeError;
use crate::features::FeatureEngine;
use crate::fusion::Fuser;
use crate::gaps::GapHandler;
use crate::normalizer::MinMaxScaler;
use crate::resample::{ResampledFrame, Resampler};
use crate::types::{Column, Reading};

/// Below this (mg/dL) the forecast is low
pub const LOW_MGDL: f64 = 70.0;
/// Above this (mg/dL) the forecast is high
pub const HIGH_MGDL: f64 = 180.0;

/// Ordered window of feature rows, `values[timestep][channel]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub channels: Vec<Column>,
    pub values: Vec<Vec<f64>>,
}

impl FeatureWindow {
    /// `(timesteps, channels)`
    pub fn shape(&self) -> (usize, usize) {
        (self.values.len(), self.channels.len())
    }

    /// Values of one channel over the window
    pub fn channel(&self, column: Column) -> Option<Vec<f64>> {
        let idx = self.channels.iter().position(|&c| c == column)?;
        Some(self.values.iter().map(|row| row[idx]).collect())
    }

    /// Most recent value of one channel
    pub fn last(&self, column: Column) -> Option<f64> {
        let idx = self.channels.iter().position(|&c| c == column)?;
        self.values.last().map(|row| row[idx])
    }
}

/// A window with the glucose value observed `horizon_bins` after its last row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub window: FeatureWindow,
    pub target_time: NaiveDateTime,
    pub target: f64,
}

/// Forecasting model seam
pub trait GlucoseModel {
    /// Predict the normalized glucose value following `window`
    fn predict(&self, window: &FeatureWindow) -> Result<f64, ComputeError>;
}

/// Baseline model: glucose stays where it was last seen
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistenceModel;

impl GlucoseModel for PersistenceModel {
    fn predict(&self, window: &FeatureWindow) -> Result<f64, ComputeError> {
        window.last(Column::Glucose).ok_or_else(|| {
            ComputeError::PredictionError("window has no glucose channel".to_string())
        })
    }
}

/// Recommendation derived from the forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Low,
    Stable,
    High,
}

impl Action {
    /// `< 70` low, `70..=180` stable, `> 180` high
    pub fn from_mgdl(mgdl: f64) -> Self {
        if mgdl < LOW_MGDL {
            Action::Low
        } else if mgdl <= HIGH_MGDL {
            Action::Stable
        } else {
            Action::High
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Action::Low => "Low glucose expected. Consider a small snack with carbohydrates.",
            Action::Stable => "Glucose expected to stay in range. Maintain your usual routine.",
            Action::High => "High glucose expected. Consider insulin or consult your doctor.",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Low => "low",
            Action::Stable => "stable",
            Action::High => "high",
        };
        f.write_str(label)
    }
}

/// Served forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_glucose: f64,
    pub unit: GlucoseUnit,
    pub action: Action,
    pub message: String,
}

/// Window over `rows` of `frame`; every cell must be present
pub fn build_window(
    frame: &ResampledFrame,
    rows: Range<usize>,
    channels: &[Column],
) -> Result<FeatureWindow, ComputeError> {
    if rows.end > frame.len() || rows.start >= rows.end {
        return Err(ComputeError::IncompleteWindow(format!(
            "rows {}..{} outside frame of {} rows",
            rows.start,
            rows.end,
            frame.len()
        )));
    }
    let columns = channels
        .iter()
        .map(|&c| frame.require(c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for (column, series) in channels.iter().zip(&columns) {
            let value = series[row].ok_or_else(|| {
                ComputeError::IncompleteWindow(format!(
                    "{column} missing at {}",
                    frame.times()[row]
                ))
            })?;
            cells.push(value);
        }
        values.push(cells);
    }

    Ok(FeatureWindow {
        channels: channels.to_vec(),
        values,
    })
}

/// Sliding windows with their glucose target `horizon_bins` ahead.
///
/// Windows are skipped when a cell or the target is missing, or when the rows
/// up to the target are not consecutive on the grid.
pub fn training_windows(frame: &ResampledFrame, config: &ForecastConfig) -> Vec<TrainingExample> {
    let span = config.window_len + config.horizon_bins;
    let Some(glucose) = frame.column(Column::Glucose) else {
        return Vec::new();
    };
    if config.window_len == 0 || frame.len() < span {
        return Vec::new();
    }

    let step = chrono::Duration::minutes(i64::from(frame.bin_minutes()));
    let times = frame.times();
    let mut examples = Vec::new();
    for start in 0..=(frame.len() - span) {
        let end = start + config.window_len;
        let target_idx = end - 1 + config.horizon_bins;
        let expected = step * (target_idx - start) as i32;
        if times[target_idx] - times[start] != expected {
            continue;
        }
        let Some(target) = glucose[target_idx] else {
            continue;
        };
        let Ok(window) = build_window(frame, start..end, &config.channels) else {
            continue;
        };
        examples.push(TrainingExample {
            window,
            target_time: times[target_idx],
            target,
        });
    }
    examples
}

/// Forecast glucose from recent raw readings.
///
/// Runs the readings through fusion, resampling, feature derivation and gap
/// filling, scales the last `window_len` rows with the fitted scaler, and maps
/// the model output back to glucose units.
pub fn predict_window(
    past_readings: &[Reading],
    config: &PipelineConfig,
    scaler: &MinMaxScaler,
    model: &dyn GlucoseModel,
) -> Result<Prediction, ComputeError> {
    config.validate()?;
    let artifact = scaler.artifact()?;
    if artifact.bin_minutes != config.sampling.bin_minutes {
        return Err(ComputeError::InvalidConfig(format!(
            "scaler fitted on {} min bins, pipeline uses {} min",
            artifact.bin_minutes, config.sampling.bin_minutes
        )));
    }
    // An unfitted channel would reach the model in raw units
    for &channel in config.forecast.channels.iter().chain([&Column::Glucose]) {
        scaler.range(channel)?;
    }

    let fused = Fuser::fuse(&[past_readings.to_vec()], config)?;
    let frame = Resampler::from_config(&config.sampling)?.resample(&fused);
    let derived = FeatureEngine::derive(frame, &config.insulin)?;
    let filled = GapHandler::interpolate(&derived, &config.gaps)?;

    let window_len = config.forecast.window_len;
    if filled.len() < window_len {
        return Err(ComputeError::IncompleteWindow(format!(
            "need {window_len} rows, readings cover {}",
            filled.len()
        )));
    }
    let recent = filled.slice(filled.len() - window_len..filled.len());
    let scaled = scaler.transform(&recent)?;
    let window = build_window(&scaled, 0..window_len, &config.forecast.channels)?;

    let normalized = model.predict(&window)?;
    if !normalized.is_finite() {
        return Err(ComputeError::PredictionError(format!(
            "model returned {normalized}"
        )));
    }
    let mmol = scaler.inverse(Column::Glucose, normalized)?;
    let mgdl = mmol * MMOL_TO_MGDL;
    let action = Action::from_mgdl(mgdl);

    tracing::info!(mgdl, %action, "forecast");

    Ok(Prediction {
        predicted_glucose: match config.forecast.output_unit {
            GlucoseUnit::Mgdl => mgdl,
            GlucoseUnit::Mmol => mmol,
        },
        unit: config.forecast.output_unit,
        action,
        message: action.message().to_string(),
    })
}
