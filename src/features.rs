//! Feature derivation
//!
//! This module derives engineered columns from a resampled frame:
//! - Rolling multi-day rapid insulin (daily average over a trailing window)
//! - Long-acting insulin plateau (forward fill of infrequent basal doses)
//! - Insulin on board (dose convolution with the insulin action curve)
//!
//! Glycemic load and hour of day are computed per reading before binning, so
//! they arrive here already aggregated.

use crate::config::InsulinConfig;
use crate::error::ComputeError;
use crate::insulin::InsulinCurve;
use crate::resample::ResampledFrame;
use crate::types::Column;

const MINUTES_PER_DAY: u64 = 24 * 60;

/// Feature engine for derived columns
pub struct FeatureEngine;

impl FeatureEngine {
    /// Derive every engineered column on a resampled frame
    pub fn derive(
        mut frame: ResampledFrame,
        insulin: &InsulinConfig,
    ) -> Result<ResampledFrame, ComputeError> {
        let curve = InsulinCurve::from_config(insulin)?;
        let bin_minutes = frame.bin_minutes();

        let rapid = frame.require(Column::RapidInsulin)?.to_vec();
        let window = rolling_window(insulin.rolling_days, bin_minutes)?;
        let rolling = rolling_daily_mean(&rapid, window, insulin.rolling_days);
        if rolling.iter().all(Option::is_none) && !rolling.is_empty() {
            tracing::warn!(
                rows = frame.len(),
                window,
                "series shorter than the rolling insulin window"
            );
        }
        frame.insert_column(Column::RapidInsulin6d, rolling)?;

        let long = forward_fill_doses(frame.require(Column::LongInsulin)?);
        frame.insert_column(Column::LongInsulin, long)?;

        let on_board = curve
            .accumulate(&rapid, bin_minutes)
            .into_iter()
            .map(Some)
            .collect();
        frame.insert_column(Column::InsulinOnBoard, on_board)?;

        tracing::debug!(rows = frame.len(), "derived feature columns");
        Ok(frame)
    }
}

/// Samples in `days` worth of bins, at least one
fn rolling_window(days: u32, bin_minutes: u32) -> Result<usize, ComputeError> {
    if bin_minutes == 0 {
        return Err(ComputeError::InvalidConfig(
            "frame bin width must be > 0".to_string(),
        ));
    }
    let bins = u64::from(days)
        .checked_mul(MINUTES_PER_DAY)
        .map(|minutes| minutes / u64::from(bin_minutes))
        .and_then(|bins| usize::try_from(bins).ok())
        .ok_or_else(|| {
            ComputeError::InvalidConfig(format!(
                "insulin.rolling_days = {days} does not fit a {bin_minutes} min grid"
            ))
        })?;
    Ok(bins.max(1))
}

/// Trailing `window`-sample sum divided by `days`.
///
/// Rows before the first full window take the first full value. When the
/// series never fills a window every row is missing.
fn rolling_daily_mean(values: &[Option<f64>], window: usize, days: u32) -> Vec<Option<f64>> {
    let n = values.len();
    if window == 0 || n < window {
        return vec![None; n];
    }
    let days = f64::from(days.max(1));

    let mut out = vec![None; n];
    let mut sum: f64 = values[..window].iter().map(|v| v.unwrap_or(0.0)).sum();
    out[window - 1] = Some(sum / days);
    for i in window..n {
        sum += values[i].unwrap_or(0.0) - values[i - window].unwrap_or(0.0);
        out[i] = Some(sum / days);
    }

    let first = out[window - 1];
    for slot in &mut out[..window - 1] {
        *slot = first;
    }
    out
}

/// Carry each non-zero dose into later zero bins until the next dose.
/// Missing cells stay missing and do not interrupt the carry.
fn forward_fill_doses(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut carry: Option<f64> = None;
    values
        .iter()
        .map(|value| match *value {
            Some(v) if v != 0.0 => {
                carry = Some(v);
                Some(v)
            }
            Some(zero) => Some(carry.unwrap_or(zero)),
            None => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::fusion::Fuser;
    use crate::resample::Resampler;
    use crate::types::{Aggregation, Reading, SourceKind};
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 8)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn frame(bin_minutes: u32, rapid: &[f64], long: &[Option<f64>]) -> ResampledFrame {
        let times = (0..rapid.len())
            .map(|i| start() + Duration::minutes(i64::from(bin_minutes) * i as i64))
            .collect();
        let mut columns = BTreeMap::new();
        columns.insert(
            Column::RapidInsulin,
            rapid.iter().copied().map(Some).collect(),
        );
        columns.insert(Column::LongInsulin, long.to_vec());
        ResampledFrame::from_columns(bin_minutes, times, columns).unwrap()
    }

    #[test]
    fn test_insulin_on_board_single_dose() {
        let mut dose = Reading::new(start(), SourceKind::MySugr);
        dose.rapid_insulin = Some(10.0);
        let fused = Fuser::fuse(&[vec![dose]], &PipelineConfig::default()).unwrap();
        let resampled = Resampler::new(15, Aggregation::Sum)
            .unwrap()
            .resample_between(&fused, start(), start() + Duration::hours(5))
            .unwrap();

        let derived = FeatureEngine::derive(resampled, &InsulinConfig::default()).unwrap();
        let iob = derived.column(Column::InsulinOnBoard).unwrap();

        assert_eq!(iob.len(), 21);
        let curve = InsulinCurve::default();
        assert_eq!(iob[0], Some(10.0 * curve.on_board(0.0)));
        assert!((iob[4].unwrap() - 6.679385666679527).abs() < 1e-6);
        assert_eq!(iob[20], Some(0.0));
    }

    #[test]
    fn test_rolling_insulin_backfills_leading_rows() {
        // 12 h bins over 2 days gives a 4-sample window
        let config = InsulinConfig {
            rolling_days: 2,
            ..InsulinConfig::default()
        };
        let input = frame(720, &[2.0, 4.0, 6.0, 0.0, 8.0], &[Some(0.0); 5]);
        let derived = FeatureEngine::derive(input, &config).unwrap();

        assert_eq!(
            derived.column(Column::RapidInsulin6d).unwrap(),
            &[Some(6.0), Some(6.0), Some(6.0), Some(6.0), Some(9.0)]
        );
    }

    #[test]
    fn test_rolling_insulin_short_series_is_missing() {
        let input = frame(15, &[2.0, 4.0], &[Some(0.0); 2]);
        let derived = FeatureEngine::derive(input, &InsulinConfig::default()).unwrap();
        assert_eq!(
            derived.column(Column::RapidInsulin6d).unwrap(),
            &[None, None]
        );
    }

    #[test]
    fn test_long_insulin_forward_fill() {
        let long = [
            Some(0.0),
            Some(10.0),
            Some(0.0),
            None,
            Some(0.0),
            Some(12.0),
            Some(0.0),
        ];
        let input = frame(15, &[0.0; 7], &long);
        let derived = FeatureEngine::derive(input, &InsulinConfig::default()).unwrap();

        assert_eq!(
            derived.column(Column::LongInsulin).unwrap(),
            &[
                Some(0.0),
                Some(10.0),
                Some(10.0),
                None,
                Some(10.0),
                Some(12.0),
                Some(12.0)
            ]
        );
    }

    #[test]
    fn test_derive_requires_insulin_columns() {
        let times = vec![start()];
        let mut columns = BTreeMap::new();
        columns.insert(Column::Glucose, vec![Some(6.0)]);
        let input = ResampledFrame::from_columns(15, times, columns).unwrap();

        let err = FeatureEngine::derive(input, &InsulinConfig::default()).unwrap_err();
        assert!(matches!(err, ComputeError::UnknownColumn(_)));
    }

    #[test]
    fn test_huge_rolling_window_leaves_column_missing() {
        let config = InsulinConfig {
            rolling_days: u32::MAX,
            ..InsulinConfig::default()
        };
        let input = frame(15, &[2.0, 4.0], &[Some(0.0); 2]);
        let derived = FeatureEngine::derive(input, &config).unwrap();
        assert_eq!(
            derived.column(Column::RapidInsulin6d).unwrap(),
            &[None, None]
        );
    }

    #[test]
    fn test_zero_width_frame_rejected() {
        let input = frame(0, &[2.0], &[Some(0.0)]);
        let err = FeatureEngine::derive(input, &InsulinConfig::default()).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidConfig(_)));
    }
}
