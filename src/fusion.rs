//! Source fusion
//!
//! Merges per-source reading sequences into one chronologically ordered,
//! deduplicated series, applying device cutover rules and the optional date
//! range along the way.

use chrono::{Duration, NaiveDateTime};

use crate::config::{CutoverRule, PipelineConfig};
use crate::error::ComputeError;
use crate::types::Reading;

/// Chronologically ordered, deduplicated readings from every source
#[derive(Debug, Clone, PartialEq)]
pub struct FusedSeries {
    readings: Vec<Reading>,
}

impl FusedSeries {
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.readings.first().map(|r| r.time)
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.readings.last().map(|r| r.time)
    }
}

/// Fusion layer
pub struct Fuser;

impl Fuser {
    /// Fuse reading sequences from several sources.
    ///
    /// Inputs are copied, never mutated. Fails with `EmptyDataset` when no
    /// meaningful reading survives.
    pub fn fuse(
        series_list: &[Vec<Reading>],
        config: &PipelineConfig,
    ) -> Result<FusedSeries, ComputeError> {
        let total: usize = series_list.iter().map(Vec::len).sum();
        let mut readings: Vec<Reading> = series_list
            .iter()
            .flatten()
            .filter(|r| in_range(r.time, config))
            .cloned()
            .collect();

        let mut nulled = 0usize;
        for rule in &config.cutover {
            nulled += apply_cutover(&mut readings, rule);
        }

        readings.retain(|r| !r.is_empty());
        // Stable: equal timestamps keep their source order
        readings.sort_by_key(|r| r.time);

        let tolerance = Duration::seconds(config.sampling.duplicate_tolerance_secs);
        let readings = dedup(readings, tolerance);

        if readings.is_empty() {
            return Err(ComputeError::EmptyDataset(
                "no readings left to fuse".to_string(),
            ));
        }

        tracing::info!(
            input = total,
            fused = readings.len(),
            cutover_nulled = nulled,
            "fused sources"
        );

        Ok(FusedSeries { readings })
    }
}

fn in_range(time: NaiveDateTime, config: &PipelineConfig) -> bool {
    config.range.start.map_or(true, |start| time >= start)
        && config.range.end.map_or(true, |end| time <= end)
}

/// Null the rule's columns on superseded readings at or after the cutover.
/// Returns how many readings were touched.
fn apply_cutover(readings: &mut [Reading], rule: &CutoverRule) -> usize {
    let mut touched = 0;
    for reading in readings
        .iter_mut()
        .filter(|r| r.source == rule.superseded && r.time >= rule.at)
    {
        for column in &rule.columns {
            reading.clear(*column);
        }
        touched += 1;
    }
    touched
}

/// Drop readings whose values repeat a kept reading within `tolerance`.
/// Expects input sorted by time.
fn dedup(readings: Vec<Reading>, tolerance: Duration) -> Vec<Reading> {
    let mut kept: Vec<Reading> = Vec::with_capacity(readings.len());
    for reading in readings {
        let earliest = reading.time - tolerance;
        let duplicate = kept
            .iter()
            .rev()
            .take_while(|k| k.time >= earliest)
            .any(|k| k.same_values(&reading));
        if !duplicate {
            kept.push(reading);
        }
    }
    kept
}
