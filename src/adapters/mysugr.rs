//! Manual log adapter
//!
//! Parses comma-separated manual-log exports carrying insulin doses,
//! carbohydrates and a free-text glycemic-index description per meal.

use csv::ReaderBuilder;

use super::{cell_quantity, optional_index, parse_time, required_index};
use super::{ParsedSource, SourceReader};
use crate::error::ComputeError;
use crate::types::{GlycemicIndex, Reading, SourceKind};

const DATE: &str = "Date";
const TIME: &str = "Time";
const BASAL: &str = "Basal Injection Units";
const MEAL_INSULIN: &str = "Insulin (Meal)";
const CORRECTION_INSULIN: &str = "Insulin (Correction)";
const CARBOHYDRATES: &str = "Meal Carbohydrates (Grams, Factor 1)";
const MEAL_DESCRIPTION: &str = "Meal Descriptions";

const TIME_FORMATS: &[&str] = &["%b %d, %Y %I:%M:%S %p", "%b %d, %Y %I:%M %p"];

/// Manual log export adapter
pub struct MySugrAdapter;

impl SourceReader for MySugrAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::MySugr
    }

    fn read(&self, raw: &str) -> Result<ParsedSource, ComputeError> {
        let mut rdr = ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(raw.as_bytes());
        let headers = rdr.headers()?.clone();

        let date_idx = required_index(&headers, DATE, self.kind())?;
        let time_idx = required_index(&headers, TIME, self.kind())?;
        let basal_idx = required_index(&headers, BASAL, self.kind())?;
        let meal_idx = required_index(&headers, MEAL_INSULIN, self.kind())?;
        let correction_idx = required_index(&headers, CORRECTION_INSULIN, self.kind())?;
        let carbs_idx = required_index(&headers, CARBOHYDRATES, self.kind())?;
        let description_idx = optional_index(&headers, MEAL_DESCRIPTION);

        let mut parsed = ParsedSource::default();
        for record in rdr.records() {
            let Ok(record) = record else {
                parsed.dropped_rows += 1;
                continue;
            };
            let stamp = match (record.get(date_idx), record.get(time_idx)) {
                (Some(date), Some(time)) => format!("{} {}", date.trim(), time.trim()),
                _ => {
                    parsed.dropped_rows += 1;
                    continue;
                }
            };
            let Some(time) = parse_time(&stamp, TIME_FORMATS) else {
                parsed.dropped_rows += 1;
                continue;
            };

            let mut reading = Reading::new(time, SourceKind::MySugr);
            reading.long_insulin = cell_quantity(&record, Some(basal_idx));
            // A meal bolus supersedes the correction logged on the same entry
            reading.rapid_insulin = cell_quantity(&record, Some(meal_idx))
                .or_else(|| cell_quantity(&record, Some(correction_idx)));
            reading.carbohydrates = cell_quantity(&record, Some(carbs_idx));
            reading.glycemic_index = description_idx
                .and_then(|idx| record.get(idx))
                .and_then(GlycemicIndex::parse);

            if reading.is_empty() {
                continue;
            }
            parsed.readings.push(reading);
        }

        Ok(parsed)
    }
}
