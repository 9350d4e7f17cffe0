//! Fixed-grid resampling
//!
//! Bins irregular readings onto an equally spaced grid. Every grid slot exists
//! in the output: mean-aggregated columns (levels and rates) are missing in
//! empty bins, sum-aggregated columns (doses and intake) are zero.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::SamplingConfig;
use crate::error::ComputeError;
use crate::fusion::FusedSeries;
use crate::types::{Aggregation, Column};

/// Dense, regularly sampled feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledFrame {
    bin_minutes: u32,
    times: Vec<NaiveDateTime>,
    columns: BTreeMap<Column, Vec<Option<f64>>>,
}

impl ResampledFrame {
    /// Build a frame from raw columns; every column must match `times` in length
    pub fn from_columns(
        bin_minutes: u32,
        times: Vec<NaiveDateTime>,
        columns: BTreeMap<Column, Vec<Option<f64>>>,
    ) -> Result<Self, ComputeError> {
        let mut frame = Self {
            bin_minutes,
            times,
            columns: BTreeMap::new(),
        };
        for (column, values) in columns {
            frame.insert_column(column, values)?;
        }
        Ok(frame)
    }

    pub fn bin_minutes(&self) -> u32 {
        self.bin_minutes
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn column(&self, column: Column) -> Option<&[Option<f64>]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    /// Column values, or `UnknownColumn` when the frame lacks it
    pub fn require(&self, column: Column) -> Result<&[Option<f64>], ComputeError> {
        self.column(column)
            .ok_or_else(|| ComputeError::UnknownColumn(column.to_string()))
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }

    /// Present columns in table order
    pub fn column_names(&self) -> Vec<Column> {
        self.columns.keys().copied().collect()
    }

    /// Insert or replace a whole column
    pub fn insert_column(
        &mut self,
        column: Column,
        values: Vec<Option<f64>>,
    ) -> Result<(), ComputeError> {
        if values.len() != self.times.len() {
            return Err(ComputeError::InvalidConfig(format!(
                "column {} has {} rows, frame has {}",
                column,
                values.len(),
                self.times.len()
            )));
        }
        self.columns.insert(column, values);
        Ok(())
    }

    /// Contiguous row slice as a new frame
    pub fn slice(&self, rows: Range<usize>) -> ResampledFrame {
        let end = rows.end.min(self.len());
        let start = rows.start.min(end);
        ResampledFrame {
            bin_minutes: self.bin_minutes,
            times: self.times[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(c, v)| (*c, v[start..end].to_vec()))
                .collect(),
        }
    }

    /// Keep only rows for which `keep(row)` holds
    pub fn filter_rows(&self, keep: impl Fn(usize) -> bool) -> ResampledFrame {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(i)).collect();
        ResampledFrame {
            bin_minutes: self.bin_minutes,
            times: rows.iter().map(|&i| self.times[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(c, v)| (*c, rows.iter().map(|&i| v[i]).collect()))
                .collect(),
        }
    }
}

/// Resampler
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    bin_minutes: u32,
    calories: Aggregation,
}

impl Resampler {
    /// Resampler for `bin_minutes`-wide bins; a zero width is rejected
    pub fn new(bin_minutes: u32, calories: Aggregation) -> Result<Self, ComputeError> {
        if bin_minutes == 0 {
            return Err(ComputeError::InvalidConfig(
                "sampling.bin_minutes must be > 0".to_string(),
            ));
        }
        Ok(Self {
            bin_minutes,
            calories,
        })
    }

    pub fn from_config(sampling: &SamplingConfig) -> Result<Self, ComputeError> {
        Self::new(sampling.bin_minutes, sampling.calories)
    }

    pub fn bin_minutes(&self) -> u32 {
        self.bin_minutes
    }

    /// Aggregation operator for a column
    pub fn aggregation(&self, column: Column) -> Aggregation {
        match column {
            Column::RapidInsulin
            | Column::LongInsulin
            | Column::Carbohydrates
            | Column::GlycemicLoad
            | Column::Distance => Aggregation::Sum,
            Column::Calories => self.calories,
            Column::Glucose
            | Column::HeartRate
            | Column::Hour
            | Column::RapidInsulin6d
            | Column::InsulinOnBoard => Aggregation::Mean,
        }
    }

    /// Resample over the series' own time span
    pub fn resample(&self, fused: &FusedSeries) -> ResampledFrame {
        match (fused.first_time(), fused.last_time()) {
            (Some(first), Some(last)) => self.bin_readings(fused, first, last),
            _ => self.empty_frame(),
        }
    }

    /// Resample onto the grid covering `[start, end]`.
    ///
    /// Readings outside the span are ignored; bins without readings are still
    /// emitted.
    pub fn resample_between(
        &self,
        fused: &FusedSeries,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ResampledFrame, ComputeError> {
        if end < start {
            return Err(ComputeError::EmptyDataset(format!(
                "resampling span ends ({end}) before it starts ({start})"
            )));
        }
        Ok(self.bin_readings(fused, start, end))
    }

    /// Resample an existing frame onto this resampler's grid.
    ///
    /// A frame already gridded at the same width comes back unchanged.
    pub fn regrid(&self, frame: &ResampledFrame) -> ResampledFrame {
        let (Some(&first), Some(&last)) = (frame.times.first(), frame.times.last()) else {
            return self.empty_frame();
        };
        let (grid_start, times) = self.grid(first, last);
        let columns = frame
            .columns
            .iter()
            .map(|(&column, values)| {
                let binned = self.bin_column(
                    column,
                    grid_start,
                    times.len(),
                    frame.times.iter().copied().zip(values.iter().copied()),
                );
                (column, binned)
            })
            .collect();
        ResampledFrame {
            bin_minutes: self.bin_minutes,
            times,
            columns,
        }
    }

    fn bin_readings(
        &self,
        fused: &FusedSeries,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> ResampledFrame {
        let (grid_start, times) = self.grid(start, end);
        let columns = Column::RESAMPLED
            .iter()
            .map(|&column| {
                let binned = self.bin_column(
                    column,
                    grid_start,
                    times.len(),
                    fused.readings().iter().map(|r| (r.time, r.value(column))),
                );
                (column, binned)
            })
            .collect();

        tracing::debug!(
            readings = fused.len(),
            bins = times.len(),
            bin_minutes = self.bin_minutes,
            "resampled series"
        );

        ResampledFrame {
            bin_minutes: self.bin_minutes,
            times,
            columns,
        }
    }

    /// Fold `(time, value)` pairs into `n_bins` bins starting at `grid_start`
    fn bin_column(
        &self,
        column: Column,
        grid_start: NaiveDateTime,
        n_bins: usize,
        values: impl Iterator<Item = (NaiveDateTime, Option<f64>)>,
    ) -> Vec<Option<f64>> {
        let mut sums = vec![0.0; n_bins];
        let mut counts = vec![0usize; n_bins];
        for (time, value) in values {
            let Some(value) = value else { continue };
            let Some(idx) = self.bin_index(grid_start, time).filter(|&i| i < n_bins) else {
                continue;
            };
            sums[idx] += value;
            counts[idx] += 1;
        }

        match self.aggregation(column) {
            Aggregation::Sum => sums.into_iter().map(Some).collect(),
            Aggregation::Mean => sums
                .into_iter()
                .zip(counts)
                .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
                .collect(),
        }
    }

    fn bin_seconds(&self) -> i64 {
        i64::from(self.bin_minutes) * 60
    }

    /// Bins are anchored at midnight of the first timestamp's day
    fn floor(&self, time: NaiveDateTime) -> NaiveDateTime {
        let offset = i64::from(time.num_seconds_from_midnight());
        let excess = offset.rem_euclid(self.bin_seconds());
        time - Duration::seconds(excess) - Duration::nanoseconds(i64::from(time.nanosecond()))
    }

    fn bin_index(&self, grid_start: NaiveDateTime, time: NaiveDateTime) -> Option<usize> {
        let offset = (time - grid_start).num_seconds();
        if offset < 0 {
            return None;
        }
        usize::try_from(offset / self.bin_seconds()).ok()
    }

    fn grid(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> (NaiveDateTime, Vec<NaiveDateTime>) {
        let grid_start = self.floor(start);
        let n_bins = self.bin_index(grid_start, end).map_or(0, |i| i + 1);
        let step = Duration::seconds(self.bin_seconds());
        let times = (0..n_bins)
            .map(|k| grid_start + step * k as i32)
            .collect();
        (grid_start, times)
    }

    fn empty_frame(&self) -> ResampledFrame {
        ResampledFrame {
            bin_minutes: self.bin_minutes,
            times: Vec::new(),
            columns: Column::RESAMPLED.iter().map(|&c| (c, Vec::new())).collect(),
        }
    }
}
