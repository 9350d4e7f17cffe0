//! Core types for the Gluco Flux pipeline
//!
//! This module defines the data structures shared by every stage: the sparse
//! `Reading` row produced by source readers, the provenance tag used by the
//! cutover rule, glycemic-index categories, and the column vocabulary of the
//! resampled feature table.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ComputeError;

/// Source identifier for provenance tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Continuous glucose reader export (tab-separated)
    Libre,
    /// Manual insulin/carbohydrate log export (comma-separated)
    MySugr,
    /// Wearable activity and heart-rate export (JSON records)
    Fitbit,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Libre => "libre",
            SourceKind::MySugr => "my_sugr",
            SourceKind::Fitbit => "fitbit",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Glycemic index category attached to a logged meal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlycemicIndex {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl GlycemicIndex {
    /// Parse a free-text category. Anything outside the known set is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(GlycemicIndex::Low),
            "medium" => Some(GlycemicIndex::Medium),
            "high" => Some(GlycemicIndex::High),
            "very high" | "veryhigh" | "very_high" => Some(GlycemicIndex::VeryHigh),
            _ => None,
        }
    }

    /// Ordinal score used for glycemic load
    pub fn score(&self) -> f64 {
        match self {
            GlycemicIndex::Low => 15.0,
            GlycemicIndex::Medium => 45.0,
            GlycemicIndex::High => 75.0,
            GlycemicIndex::VeryHigh => 95.0,
        }
    }
}

/// Score for an optional category; absent categories score zero
pub fn glycemic_score(gi: Option<GlycemicIndex>) -> f64 {
    gi.map(|g| g.score()).unwrap_or(0.0)
}

/// One timestamped, possibly sparse observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Observation time (local wall clock of the exporting device)
    pub time: NaiveDateTime,
    /// Where this reading came from
    pub source: SourceKind,
    /// Glucose (mmol/L)
    #[serde(default)]
    pub glucose: Option<f64>,
    /// Rapid-acting insulin (units)
    #[serde(default)]
    pub rapid_insulin: Option<f64>,
    /// Long-acting insulin (units)
    #[serde(default)]
    pub long_insulin: Option<f64>,
    /// Carbohydrates (grams)
    #[serde(default)]
    pub carbohydrates: Option<f64>,
    /// Meal glycemic index category
    #[serde(default)]
    pub glycemic_index: Option<GlycemicIndex>,
    /// Heart rate (bpm)
    #[serde(default)]
    pub heart_rate: Option<f64>,
    /// Distance (meters)
    #[serde(default)]
    pub distance: Option<f64>,
    /// Calories
    #[serde(default)]
    pub calories: Option<f64>,
}

impl Reading {
    /// Empty reading at `time`; callers fill the fields they observed
    pub fn new(time: NaiveDateTime, source: SourceKind) -> Self {
        Self {
            time,
            source,
            glucose: None,
            rapid_insulin: None,
            long_insulin: None,
            carbohydrates: None,
            glycemic_index: None,
            heart_rate: None,
            distance: None,
            calories: None,
        }
    }

    /// True when no field besides `time` carries a value
    pub fn is_empty(&self) -> bool {
        self.glucose.is_none()
            && self.rapid_insulin.is_none()
            && self.long_insulin.is_none()
            && self.carbohydrates.is_none()
            && self.glycemic_index.is_none()
            && self.heart_rate.is_none()
            && self.distance.is_none()
            && self.calories.is_none()
    }

    /// Raw value of a column as seen at this reading.
    ///
    /// `GlycemicLoad` and `Hour` are derived per reading; the engineered
    /// series columns have no per-reading value.
    pub fn value(&self, column: Column) -> Option<f64> {
        match column {
            Column::Glucose => self.glucose,
            Column::RapidInsulin => self.rapid_insulin,
            Column::LongInsulin => self.long_insulin,
            Column::Carbohydrates => self.carbohydrates,
            Column::GlycemicLoad => self
                .carbohydrates
                .map(|carbs| glycemic_score(self.glycemic_index) * carbs / 100.0),
            Column::HeartRate => self.heart_rate,
            Column::Distance => self.distance,
            Column::Calories => self.calories,
            Column::Hour => Some(self.time.hour() as f64),
            Column::RapidInsulin6d | Column::InsulinOnBoard => None,
        }
    }

    /// Clear a column, used by the cutover rule
    pub fn clear(&mut self, column: Column) {
        match column {
            Column::Glucose => self.glucose = None,
            Column::RapidInsulin => self.rapid_insulin = None,
            Column::LongInsulin => self.long_insulin = None,
            Column::Carbohydrates => self.carbohydrates = None,
            Column::GlycemicLoad => self.glycemic_index = None,
            Column::HeartRate => self.heart_rate = None,
            Column::Distance => self.distance = None,
            Column::Calories => self.calories = None,
            Column::Hour | Column::RapidInsulin6d | Column::InsulinOnBoard => {}
        }
    }

    /// Field-wise equality ignoring provenance, comparing floats bitwise
    pub fn same_values(&self, other: &Reading) -> bool {
        fn eq(a: Option<f64>, b: Option<f64>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x.to_bits() == y.to_bits(),
                (None, None) => true,
                _ => false,
            }
        }
        eq(self.glucose, other.glucose)
            && eq(self.rapid_insulin, other.rapid_insulin)
            && eq(self.long_insulin, other.long_insulin)
            && eq(self.carbohydrates, other.carbohydrates)
            && self.glycemic_index == other.glycemic_index
            && eq(self.heart_rate, other.heart_rate)
            && eq(self.distance, other.distance)
            && eq(self.calories, other.calories)
    }
}

/// How a column is folded into a resampling bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Levels and rates: empty bins are missing
    Mean,
    /// Doses and intake: empty bins are zero
    Sum,
}

/// Column vocabulary of the resampled feature table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Glucose,
    RapidInsulin,
    LongInsulin,
    Carbohydrates,
    GlycemicLoad,
    HeartRate,
    Distance,
    Calories,
    Hour,
    RapidInsulin6d,
    InsulinOnBoard,
}

impl Column {
    /// Columns produced directly by the resampler
    pub const RESAMPLED: [Column; 9] = [
        Column::Glucose,
        Column::RapidInsulin,
        Column::LongInsulin,
        Column::Carbohydrates,
        Column::GlycemicLoad,
        Column::HeartRate,
        Column::Distance,
        Column::Calories,
        Column::Hour,
    ];

    /// Every column, in table order
    pub const ALL: [Column; 11] = [
        Column::Glucose,
        Column::RapidInsulin,
        Column::LongInsulin,
        Column::Carbohydrates,
        Column::GlycemicLoad,
        Column::HeartRate,
        Column::Distance,
        Column::Calories,
        Column::Hour,
        Column::RapidInsulin6d,
        Column::InsulinOnBoard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Glucose => "glucose",
            Column::RapidInsulin => "rapid_insulin",
            Column::LongInsulin => "long_insulin",
            Column::Carbohydrates => "carbohydrates",
            Column::GlycemicLoad => "glycemic_load",
            Column::HeartRate => "heart_rate",
            Column::Distance => "distance",
            Column::Calories => "calories",
            Column::Hour => "hour",
            Column::RapidInsulin6d => "rapid_insulin_6d",
            Column::InsulinOnBoard => "insulin_on_board",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ComputeError::UnknownColumn(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_glycemic_index_parse() {
        assert_eq!(GlycemicIndex::parse("Very High"), Some(GlycemicIndex::VeryHigh));
        assert_eq!(GlycemicIndex::parse(" low "), Some(GlycemicIndex::Low));
        assert_eq!(GlycemicIndex::parse("pasta with sauce"), None);
        assert_eq!(glycemic_score(None), 0.0);
    }

    #[test]
    fn test_glycemic_load_per_reading() {
        let mut reading = Reading::new(at(12, 0), SourceKind::MySugr);
        reading.carbohydrates = Some(60.0);
        reading.glycemic_index = Some(GlycemicIndex::High);
        assert_eq!(reading.value(Column::GlycemicLoad), Some(45.0));

        // Unknown category scores zero, missing carbohydrates stay missing
        reading.glycemic_index = None;
        assert_eq!(reading.value(Column::GlycemicLoad), Some(0.0));
        reading.carbohydrates = None;
        assert_eq!(reading.value(Column::GlycemicLoad), None);
    }

    #[test]
    fn test_empty_reading() {
        let mut reading = Reading::new(at(8, 15), SourceKind::Libre);
        assert!(reading.is_empty());
        reading.heart_rate = Some(70.0);
        assert!(!reading.is_empty());
        assert_eq!(reading.value(Column::Hour), Some(8.0));
    }

    #[test]
    fn test_column_round_trip_names() {
        for column in Column::ALL {
            assert_eq!(column.as_str().parse::<Column>().unwrap(), column);
        }
        assert!("bpm".parse::<Column>().is_err());
    }
}
