//! Wearable adapter
//!
//! Parses wearable activity exports: one JSON record per sample, either as
//! newline-delimited JSON or as a single JSON array. Each file carries one
//! metric (heart rate, calories or distance).

use serde_json::Value;

use super::{parse_time, ParsedSource, SourceReader};
use crate::error::ComputeError;
use crate::types::{Reading, SourceKind};

const TIME_FORMATS: &[&str] = &["%m/%d/%y %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Metric carried by a wearable export file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitbitMetric {
    /// `value.bpm`
    HeartRate,
    /// `value`, numeric string
    Calories,
    /// `value`, centimeters
    Distance,
}

/// Wearable export adapter
pub struct FitbitAdapter {
    metric: FitbitMetric,
}

impl FitbitAdapter {
    pub fn new(metric: FitbitMetric) -> Self {
        Self { metric }
    }

    fn schema_error(&self, column: &str) -> ComputeError {
        ComputeError::Schema {
            kind: self.kind(),
            column: column.to_string(),
        }
    }

    /// The first record decides whether the file has the expected shape
    fn check_schema(&self, record: &Value) -> Result<(), ComputeError> {
        if record.get("dateTime").is_none() {
            return Err(self.schema_error("dateTime"));
        }
        let value = record.get("value").ok_or_else(|| self.schema_error("value"))?;
        if self.metric == FitbitMetric::HeartRate && value.get("bpm").is_none() {
            return Err(self.schema_error("value.bpm"));
        }
        Ok(())
    }

    fn to_reading(&self, record: &Value) -> Option<Reading> {
        let time = parse_time(record.get("dateTime")?.as_str()?, TIME_FORMATS)?;
        let value = record.get("value")?;
        let mut reading = Reading::new(time, SourceKind::Fitbit);
        match self.metric {
            FitbitMetric::HeartRate => reading.heart_rate = number(value.get("bpm")?),
            FitbitMetric::Calories => reading.calories = number(value),
            FitbitMetric::Distance => reading.distance = number(value).map(|cm| cm / 100.0),
        }
        (!reading.is_empty()).then_some(reading)
    }
}

impl SourceReader for FitbitAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Fitbit
    }

    fn read(&self, raw: &str) -> Result<ParsedSource, ComputeError> {
        let mut parsed = ParsedSource::default();

        let records: Vec<Value> = if raw.trim_start().starts_with('[') {
            serde_json::from_str(raw)?
        } else {
            let mut records = Vec::new();
            for line in raw.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(record) => records.push(record),
                    Err(_) => parsed.dropped_rows += 1,
                }
            }
            records
        };

        if let Some(first) = records.first() {
            self.check_schema(first)?;
        }

        for record in &records {
            match self.to_reading(record) {
                Some(reading) => parsed.readings.push(reading),
                None => parsed.dropped_rows += 1,
            }
        }

        Ok(parsed)
    }
}

/// Numbers arrive either as JSON numbers or as numeric strings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
