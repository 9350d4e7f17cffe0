//! Source export adapters
//!
//! This module provides adapters that parse raw export files and map them to
//! the common `Reading` schema. Adapters are stateless: the same bytes always
//! produce the same readings.

mod fitbit;
mod libre;
mod mysugr;

pub use fitbit::{FitbitAdapter, FitbitMetric};
pub use libre::LibreAdapter;
pub use mysugr::MySugrAdapter;

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::config::SourceFormat;
use crate::error::ComputeError;
use crate::types::{Reading, SourceKind};

/// Readings parsed from one export, plus the count of rows that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSource {
    pub readings: Vec<Reading>,
    pub dropped_rows: usize,
}

/// Trait for source export adapters
pub trait SourceReader {
    /// Provenance tag stamped on every reading
    fn kind(&self) -> SourceKind;

    /// Parse a raw export into readings.
    ///
    /// Rows with unparseable timestamps (or no values at all) are dropped and
    /// counted; a missing required column fails the whole read.
    fn read(&self, raw: &str) -> Result<ParsedSource, ComputeError>;
}

/// Adapter for a configured export format
pub fn adapter_for(format: SourceFormat) -> Box<dyn SourceReader> {
    match format {
        SourceFormat::LibreTsv => Box::new(LibreAdapter),
        SourceFormat::MySugrCsv => Box::new(MySugrAdapter),
        SourceFormat::FitbitHeartRate => Box::new(FitbitAdapter::new(FitbitMetric::HeartRate)),
        SourceFormat::FitbitCalories => Box::new(FitbitAdapter::new(FitbitMetric::Calories)),
        SourceFormat::FitbitDistance => Box::new(FitbitAdapter::new(FitbitMetric::Distance)),
    }
}

/// Parse a raw export with the adapter for `format`, logging dropped rows
pub fn read_source(format: SourceFormat, raw: &str) -> Result<ParsedSource, ComputeError> {
    let adapter = adapter_for(format);
    let parsed = adapter.read(raw)?;
    if parsed.dropped_rows > 0 {
        tracing::warn!(
            source = %adapter.kind(),
            dropped = parsed.dropped_rows,
            kept = parsed.readings.len(),
            "dropped malformed rows"
        );
    } else {
        tracing::debug!(source = %adapter.kind(), kept = parsed.readings.len(), "parsed export");
    }
    Ok(parsed)
}

fn required_index(
    headers: &StringRecord,
    name: &str,
    kind: SourceKind,
) -> Result<usize, ComputeError> {
    optional_index(headers, name).ok_or_else(|| ComputeError::Schema {
        kind,
        column: name.to_string(),
    })
}

fn optional_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Read an optional numeric cell; blanks and junk are missing
fn cell_f64(record: &StringRecord, index: Option<usize>) -> Option<f64> {
    let raw = record.get(index?)?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Doses and intake are never negative
fn cell_quantity(record: &StringRecord, index: Option<usize>) -> Option<f64> {
    cell_f64(record, index).filter(|v| *v >= 0.0)
}

fn parse_time(raw: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_parsing() {
        let record = StringRecord::from(vec!["5.4", "", "abc", "-2", "inf"]);
        assert_eq!(cell_f64(&record, Some(0)), Some(5.4));
        assert_eq!(cell_f64(&record, Some(1)), None);
        assert_eq!(cell_f64(&record, Some(2)), None);
        assert_eq!(cell_f64(&record, Some(3)), Some(-2.0));
        assert_eq!(cell_quantity(&record, Some(3)), None);
        assert_eq!(cell_f64(&record, Some(4)), None);
        assert_eq!(cell_f64(&record, Some(9)), None);
        assert_eq!(cell_f64(&record, None), None);
    }

    #[test]
    fn test_adapter_dispatch() {
        assert_eq!(adapter_for(SourceFormat::LibreTsv).kind(), SourceKind::Libre);
        assert_eq!(adapter_for(SourceFormat::MySugrCsv).kind(), SourceKind::MySugr);
        assert_eq!(
            adapter_for(SourceFormat::FitbitDistance).kind(),
            SourceKind::Fitbit
        );
    }
}
