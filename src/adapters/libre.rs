//! Glucose reader adapter
//!
//! Parses tab-separated reader exports. Only historic glucose (the reliable
//! fixed-cadence series) is used; scan glucose is ignored.

use csv::ReaderBuilder;

use super::{cell_f64, cell_quantity, optional_index, parse_time, required_index};
use super::{ParsedSource, SourceReader};
use crate::config::MMOL_TO_MGDL;
use crate::error::ComputeError;
use crate::types::{Reading, SourceKind};

const TIME: &str = "Time";
const GLUCOSE_MMOL: &str = "Historic Glucose (mmol/L)";
const GLUCOSE_MGDL: &str = "Historic Glucose (mg/dL)";
const RAPID_INSULIN: &str = "Rapid-Acting Insulin (units)";
const LONG_INSULIN: &str = "Long-Acting Insulin (units)";
const CARBOHYDRATES: &str = "Carbohydrates (grams)";

const TIME_FORMATS: &[&str] = &["%Y/%m/%d %H:%M", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Reader export adapter
pub struct LibreAdapter;

impl SourceReader for LibreAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Libre
    }

    fn read(&self, raw: &str) -> Result<ParsedSource, ComputeError> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .has_headers(true)
            .from_reader(raw.as_bytes());
        let headers = rdr.headers()?.clone();

        let time_idx = required_index(&headers, TIME, self.kind())?;
        // Either glucose unit satisfies the schema; mg/dL is converted
        let (glucose_idx, glucose_scale) = match optional_index(&headers, GLUCOSE_MMOL) {
            Some(idx) => (idx, 1.0),
            None => match optional_index(&headers, GLUCOSE_MGDL) {
                Some(idx) => (idx, 1.0 / MMOL_TO_MGDL),
                None => (required_index(&headers, GLUCOSE_MMOL, self.kind())?, 1.0),
            },
        };
        let rapid_idx = optional_index(&headers, RAPID_INSULIN);
        let long_idx = optional_index(&headers, LONG_INSULIN);
        let carbs_idx = optional_index(&headers, CARBOHYDRATES);

        let mut parsed = ParsedSource::default();
        for record in rdr.records() {
            let Ok(record) = record else {
                parsed.dropped_rows += 1;
                continue;
            };
            let Some(time) = record
                .get(time_idx)
                .and_then(|t| parse_time(t, TIME_FORMATS))
            else {
                parsed.dropped_rows += 1;
                continue;
            };

            let mut reading = Reading::new(time, SourceKind::Libre);
            reading.glucose = cell_f64(&record, Some(glucose_idx)).map(|g| g * glucose_scale);
            reading.rapid_insulin = cell_quantity(&record, rapid_idx);
            reading.long_insulin = cell_quantity(&record, long_idx);
            reading.carbohydrates = cell_quantity(&record, carbs_idx);

            // Scan-only and note rows carry nothing we use
            if reading.is_empty() {
                continue;
            }
            parsed.readings.push(reading);
        }

        Ok(parsed)
    }
}
