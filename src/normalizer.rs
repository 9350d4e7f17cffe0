//! Min-max normalization
//!
//! Fits per-column ranges on the training partition only and maps every
//! partition with those ranges. The fitted ranges are persisted as a
//! `ScalerArtifact` so predictions can be mapped back to physical units at
//! serving time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ComputeError;
use crate::resample::ResampledFrame;
use crate::types::Column;

/// Observed training range of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub min: f64,
    pub max: f64,
}

impl ColumnRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Map into `[0, 1]` for values inside the range; constant columns map to 0
    pub fn scale(&self, value: f64) -> f64 {
        let span = self.span();
        if span == 0.0 {
            return 0.0;
        }
        (value - self.min) / span
    }

    pub fn unscale(&self, value: f64) -> f64 {
        value * self.span() + self.min
    }
}

/// Persisted scaler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    /// Identifies the dataset build the ranges came from
    pub run_id: Uuid,
    pub fitted_at: DateTime<Utc>,
    /// Grid width of the frames the scaler was fitted on
    pub bin_minutes: u32,
    pub ranges: BTreeMap<Column, ColumnRange>,
}

impl ScalerArtifact {
    /// Load scaler state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize scaler state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Per-column min-max scaler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinMaxScaler {
    fitted: Option<ScalerArtifact>,
}

impl MinMaxScaler {
    /// Unfitted scaler
    pub fn new() -> Self {
        Self { fitted: None }
    }

    pub fn from_artifact(artifact: ScalerArtifact) -> Self {
        Self {
            fitted: Some(artifact),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn artifact(&self) -> Result<&ScalerArtifact, ComputeError> {
        self.fitted.as_ref().ok_or(ComputeError::NotFitted)
    }

    /// Record min and max of every column over the training rows.
    ///
    /// Columns with no observed value get no range and pass through
    /// `transform` unchanged; `predict_window` refuses them as model channels.
    pub fn fit(&mut self, train: &ResampledFrame) -> Result<(), ComputeError> {
        if train.is_empty() {
            return Err(ComputeError::EmptyDataset(
                "cannot fit scaler on an empty training partition".to_string(),
            ));
        }

        let mut ranges = BTreeMap::new();
        for column in train.column_names() {
            let values = train.require(column)?;
            match observed_range(values) {
                Some(range) => {
                    ranges.insert(column, range);
                }
                None => tracing::warn!(%column, "no training values, column left unscaled"),
            }
        }

        tracing::debug!(columns = ranges.len(), rows = train.len(), "fitted scaler");
        self.fitted = Some(ScalerArtifact {
            run_id: Uuid::new_v4(),
            fitted_at: Utc::now(),
            bin_minutes: train.bin_minutes(),
            ranges,
        });
        Ok(())
    }

    /// Scale every fitted column of a frame
    pub fn transform(&self, frame: &ResampledFrame) -> Result<ResampledFrame, ComputeError> {
        let artifact = self.artifact()?;
        let mut scaled = frame.clone();
        for column in frame.column_names() {
            let Some(range) = artifact.ranges.get(&column) else {
                continue;
            };
            let values = frame
                .require(column)?
                .iter()
                .map(|v| v.map(|v| range.scale(v)))
                .collect();
            scaled.insert_column(column, values)?;
        }
        Ok(scaled)
    }

    /// Scale one value of a column
    pub fn scale(&self, column: Column, value: f64) -> Result<f64, ComputeError> {
        Ok(self.range(column)?.scale(value))
    }

    /// Map a scaled value of a column back to its original units
    pub fn inverse(&self, column: Column, value: f64) -> Result<f64, ComputeError> {
        Ok(self.range(column)?.unscale(value))
    }

    pub fn range(&self, column: Column) -> Result<&ColumnRange, ComputeError> {
        self.artifact()?
            .ranges
            .get(&column)
            .ok_or_else(|| ComputeError::UnknownColumn(column.to_string()))
    }

    /// Load fitted state from JSON
    pub fn load(json: &str) -> Result<Self, ComputeError> {
        let artifact =
            ScalerArtifact::from_json(json).map_err(|e| ComputeError::ParseError(e.to_string()))?;
        Ok(Self::from_artifact(artifact))
    }

    /// Save fitted state to JSON
    pub fn save(&self) -> Result<String, ComputeError> {
        Ok(self.artifact()?.to_json()?)
    }
}

fn observed_range(values: &[Option<f64>]) -> Option<ColumnRange> {
    values
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<ColumnRange>, &v| {
            Some(match acc {
                Some(r) => ColumnRange {
                    min: r.min.min(v),
                    max: r.max.max(v),
                },
                None => ColumnRange { min: v, max: v },
            })
        })
}
