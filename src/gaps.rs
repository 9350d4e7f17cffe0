//! Gap handling
//!
//! Splits a derived frame chronologically into train, validation and test
//! partitions, fills glucose and heart-rate gaps inside train and validation,
//! and drops test rows without a glucose value. Test data is never
//! interpolated so no filled value reaches evaluation.
//!
//! Quadratic filling is local: each gap takes the parabola through its two
//! bounding points and one neighbour. It is not a spline over the whole
//! column, so curvature is not continuous from one gap to the next and a
//! distant reading never moves a filled value.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::{GapConfig, InterpolationMethod, SplitConfig};
use crate::error::ComputeError;
use crate::fusion::FusedSeries;
use crate::resample::ResampledFrame;
use crate::types::Column;

/// Columns filled by interpolation
pub const INTERPOLATED: [Column; 2] = [Column::Glucose, Column::HeartRate];

// 0.7 + 0.2 is not exactly 0.9 in binary
const SPLIT_EPSILON: f64 = 1e-9;

/// Chronological partitions of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFrames {
    pub train: ResampledFrame,
    pub validation: ResampledFrame,
    pub test: ResampledFrame,
}

/// Interval between consecutive glucose readings that exceeds a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseGap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub minutes: i64,
}

/// Gap handler
pub struct GapHandler;

impl GapHandler {
    /// Split, fill train/validation gaps, drop incomplete test rows
    pub fn partition(
        frame: &ResampledFrame,
        split: &SplitConfig,
        gaps: &GapConfig,
    ) -> Result<SplitFrames, ComputeError> {
        let parts = Self::split(frame, split);
        let test = Self::drop_missing_glucose(&parts.test);
        if test.len() < parts.test.len() {
            tracing::info!(
                dropped = parts.test.len() - test.len(),
                "dropped test rows without glucose"
            );
        }
        Ok(SplitFrames {
            train: Self::interpolate(&parts.train, gaps)?,
            validation: Self::interpolate(&parts.validation, gaps)?,
            test,
        })
    }

    /// Row ranges `[0, ⌊n·train⌋)`, `[⌊n·train⌋, ⌊n·(train+validation)⌋)`, rest
    pub fn split(frame: &ResampledFrame, split: &SplitConfig) -> SplitFrames {
        let n = frame.len();
        let (train_end, validation_end) = split_points(n, split);
        tracing::debug!(
            rows = n,
            train = train_end,
            validation = validation_end - train_end,
            test = n - validation_end,
            "split frame"
        );
        SplitFrames {
            train: frame.slice(0..train_end),
            validation: frame.slice(train_end..validation_end),
            test: frame.slice(validation_end..n),
        }
    }

    /// Fill missing glucose and heart-rate values.
    ///
    /// Leading gaps stay missing, trailing gaps hold the last known value.
    /// Interior gaps longer than `max_gap_bins` are left alone.
    pub fn interpolate(
        frame: &ResampledFrame,
        config: &GapConfig,
    ) -> Result<ResampledFrame, ComputeError> {
        let mut filled = frame.clone();
        for column in INTERPOLATED {
            if let Some(values) = frame.column(column) {
                filled.insert_column(column, fill_column(values, config))?;
            }
        }
        Ok(filled)
    }

    /// Keep only rows with a glucose value
    pub fn drop_missing_glucose(frame: &ResampledFrame) -> ResampledFrame {
        match frame.column(Column::Glucose) {
            Some(glucose) => frame.filter_rows(|i| glucose[i].is_some()),
            None => frame.slice(0..0),
        }
    }

    /// Consecutive glucose readings further apart than `threshold_minutes`
    pub fn find_glucose_gaps(fused: &FusedSeries, threshold_minutes: i64) -> Vec<GlucoseGap> {
        let times: Vec<NaiveDateTime> = fused
            .readings()
            .iter()
            .filter(|r| r.glucose.is_some())
            .map(|r| r.time)
            .collect();
        times
            .windows(2)
            .filter_map(|pair| {
                let minutes = (pair[1] - pair[0]).num_minutes();
                (minutes > threshold_minutes).then(|| GlucoseGap {
                    start: pair[0],
                    end: pair[1],
                    minutes,
                })
            })
            .collect()
    }
}

fn split_points(n: usize, split: &SplitConfig) -> (usize, usize) {
    let rows = n as f64;
    let point = |fraction: f64| ((rows * fraction + SPLIT_EPSILON).floor() as usize).min(n);
    let train_end = point(split.train);
    let validation_end = point(split.train + split.validation).max(train_end);
    (train_end, validation_end)
}

fn fill_column(values: &[Option<f64>], config: &GapConfig) -> Vec<Option<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let mut out = values.to_vec();
    let Some(&last) = known.last() else {
        return out;
    };

    for (k, pair) in known.windows(2).enumerate() {
        let ((left, _), (right, _)) = (pair[0], pair[1]);
        let missing = right - left - 1;
        if missing == 0 {
            continue;
        }
        if config.max_gap_bins.is_some_and(|max| missing > max) {
            continue;
        }
        for (x, slot) in out.iter_mut().enumerate().take(right).skip(left + 1) {
            *slot = Some(match config.method {
                InterpolationMethod::Linear => linear(pair[0], pair[1], x),
                InterpolationMethod::Quadratic => quadratic(&known, k, x),
            });
        }
    }

    let trailing = values.len() - last.0 - 1;
    if trailing > 0 && !config.max_gap_bins.is_some_and(|max| trailing > max) {
        for slot in &mut out[last.0 + 1..] {
            *slot = Some(last.1);
        }
    }
    out
}

fn linear((x0, y0): (usize, f64), (x1, y1): (usize, f64), x: usize) -> f64 {
    let t = (x - x0) as f64 / (x1 - x0) as f64;
    y0 + t * (y1 - y0)
}

/// Second-order Lagrange fit through the gap's bounding points and one more
/// neighbour, the previous known point when there is one
fn quadratic(known: &[(usize, f64)], left: usize, x: usize) -> f64 {
    let points = if left > 0 {
        [known[left - 1], known[left], known[left + 1]]
    } else if left + 2 < known.len() {
        [known[left], known[left + 1], known[left + 2]]
    } else {
        return linear(known[left], known[left + 1], x);
    };

    let x = x as f64;
    let mut value = 0.0;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut basis = 1.0;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                basis *= (x - xj as f64) / (xi as f64 - xj as f64);
            }
        }
        value += yi * basis;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::fusion::Fuser;
    use crate::types::{Reading, SourceKind};
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 8)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn frame(glucose: &[Option<f64>]) -> ResampledFrame {
        let times = (0..glucose.len())
            .map(|i| start() + Duration::minutes(15 * i as i64))
            .collect();
        let mut columns = BTreeMap::new();
        columns.insert(Column::Glucose, glucose.to_vec());
        columns.insert(Column::Carbohydrates, vec![Some(0.0); glucose.len()]);
        ResampledFrame::from_columns(15, times, columns).unwrap()
    }

    #[test]
    fn test_split_sizes_and_order() {
        let input = frame(&[Some(5.0); 10]);
        let parts = GapHandler::split(&input, &SplitConfig::default());

        assert_eq!(parts.train.len(), 7);
        assert_eq!(parts.validation.len(), 2);
        assert_eq!(parts.test.len(), 1);
        assert!(parts.train.times().last() < parts.validation.times().first());
        assert!(parts.validation.times().last() < parts.test.times().first());

        for n in [0, 1, 3, 17, 101] {
            let input = frame(&vec![Some(5.0); n]);
            let parts = GapHandler::split(&input, &SplitConfig::default());
            assert_eq!(
                parts.train.len() + parts.validation.len() + parts.test.len(),
                n
            );
        }
    }

    #[test]
    fn test_linear_interpolation() {
        let input = frame(&[None, Some(4.0), None, None, Some(7.0), None]);
        let filled = GapHandler::interpolate(&input, &GapConfig::default()).unwrap();
        assert_eq!(
            filled.column(Column::Glucose).unwrap(),
            &[None, Some(4.0), Some(5.0), Some(6.0), Some(7.0), Some(7.0)]
        );
        // Columns outside the interpolated set are untouched
        assert_eq!(
            filled.column(Column::Carbohydrates),
            input.column(Column::Carbohydrates)
        );
    }

    #[test]
    fn test_quadratic_interpolation_follows_curvature() {
        // y = x² sampled at 0, 1, 2 and 4
        let input = frame(&[Some(0.0), Some(1.0), Some(4.0), None, Some(16.0)]);
        let config = GapConfig {
            method: InterpolationMethod::Quadratic,
            max_gap_bins: None,
        };
        let filled = GapHandler::interpolate(&input, &config).unwrap();
        let value = filled.column(Column::Glucose).unwrap()[3].unwrap();
        assert!((value - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_quadratic_fill_ignores_distant_points() {
        let config = GapConfig {
            method: InterpolationMethod::Quadratic,
            max_gap_bins: None,
        };
        let near = [Some(0.0), Some(1.0), Some(4.0), None, Some(16.0)];
        let mut far = near.to_vec();
        far.extend([Some(3.0), Some(40.0), Some(-7.0)]);

        let short = GapHandler::interpolate(&frame(&near), &config).unwrap();
        let long = GapHandler::interpolate(&frame(&far), &config).unwrap();
        assert_eq!(
            short.column(Column::Glucose).unwrap()[3],
            long.column(Column::Glucose).unwrap()[3]
        );
    }

    #[test]
    fn test_max_gap_leaves_long_gaps() {
        let input = frame(&[Some(4.0), None, None, None, Some(8.0), None, Some(6.0)]);
        let config = GapConfig {
            method: InterpolationMethod::Linear,
            max_gap_bins: Some(2),
        };
        let filled = GapHandler::interpolate(&input, &config).unwrap();
        assert_eq!(
            filled.column(Column::Glucose).unwrap(),
            &[Some(4.0), None, None, None, Some(8.0), Some(7.0), Some(6.0)]
        );
    }

    #[test]
    fn test_partition_drops_test_gaps_without_filling() {
        let mut glucose = vec![Some(5.0); 20];
        glucose[3] = None;
        glucose[19] = None;
        let parts = GapHandler::partition(
            &frame(&glucose),
            &SplitConfig::default(),
            &GapConfig::default(),
        )
        .unwrap();

        assert_eq!(parts.train.column(Column::Glucose).unwrap()[3], Some(5.0));
        assert_eq!(parts.test.len(), 1);
        assert!(parts
            .test
            .column(Column::Glucose)
            .unwrap()
            .iter()
            .all(Option::is_some));
    }

    #[test]
    fn test_find_glucose_gaps() {
        let readings: Vec<Reading> = [0, 15, 60, 75, 120]
            .iter()
            .map(|&m| {
                let mut r = Reading::new(start() + Duration::minutes(m), SourceKind::Libre);
                r.glucose = Some(6.0 + m as f64 / 100.0);
                r
            })
            .collect();
        let fused = Fuser::fuse(&[readings], &PipelineConfig::default()).unwrap();

        let gaps = GapHandler::find_glucose_gaps(&fused, 20);
        assert_eq!(
            gaps,
            vec![
                GlucoseGap {
                    start: start() + Duration::minutes(15),
                    end: start() + Duration::minutes(60),
                    minutes: 45,
                },
                GlucoseGap {
                    start: start() + Duration::minutes(75),
                    end: start() + Duration::minutes(120),
                    minutes: 45,
                },
            ]
        );
    }
}
