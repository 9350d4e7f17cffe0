//! Pipeline orchestration
//!
//! This module provides the public API for Gluco Flux.
//! It orchestrates the full pipeline from raw exports to a partitioned,
//! normalized dataset, and serves forecasts from recent readings.

use std::fs;

use crate::adapters::read_source;
use crate::config::{PipelineConfig, SourceFormat};
use crate::dataset::PartitionedDataset;
use crate::error::ComputeError;
use crate::features::FeatureEngine;
use crate::forecast::{predict_window, GlucoseModel, PersistenceModel, Prediction};
use crate::fusion::{FusedSeries, Fuser};
use crate::gaps::{GapHandler, GlucoseGap};
use crate::normalizer::MinMaxScaler;
use crate::resample::{ResampledFrame, Resampler};
use crate::types::Reading;

/// Raw export content tagged with its format
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInput {
    pub format: SourceFormat,
    pub content: String,
}

impl SourceInput {
    pub fn new(format: SourceFormat, content: impl Into<String>) -> Self {
        Self {
            format,
            content: content.into(),
        }
    }
}

/// Read every source file listed in the config
pub fn load_sources(config: &PipelineConfig) -> Result<Vec<SourceInput>, ComputeError> {
    config
        .sources
        .iter()
        .map(|file| {
            let content = fs::read_to_string(&file.path)?;
            tracing::debug!(path = %file.path.display(), bytes = content.len(), "loaded source");
            Ok(SourceInput::new(file.format, content))
        })
        .collect()
}

/// Validate the config, then parse and fuse raw exports.
///
/// # Example
/// ```ignore
/// let fused = fuse_sources(&[SourceInput::new(SourceFormat::LibreTsv, tsv)], &config)?;
/// ```
pub fn fuse_sources(
    sources: &[SourceInput],
    config: &PipelineConfig,
) -> Result<FusedSeries, ComputeError> {
    config.validate()?;
    let series = sources
        .iter()
        .map(|source| read_source(source.format, &source.content).map(|p| p.readings))
        .collect::<Result<Vec<_>, _>>()?;
    Fuser::fuse(&series, config)
}

/// Raw exports to the resampled frame with every derived column
pub fn build_features(
    sources: &[SourceInput],
    config: &PipelineConfig,
) -> Result<ResampledFrame, ComputeError> {
    let fused = fuse_sources(sources, config)?;
    let frame = Resampler::from_config(&config.sampling)?.resample(&fused);
    FeatureEngine::derive(frame, &config.insulin)
}

/// Raw exports to train, validation and test partitions plus the fitted scaler.
///
/// # Arguments
/// * `sources` - Raw exports with their format tags
/// * `config` - Pipeline configuration (validated before any source is read)
pub fn prepare_dataset(
    sources: &[SourceInput],
    config: &PipelineConfig,
) -> Result<PartitionedDataset, ComputeError> {
    let frame = build_features(sources, config)?;
    PartitionedDataset::from_frame(&frame, config)
}

/// Glucose recording gaps longer than `threshold_minutes`
pub fn glucose_gaps(
    sources: &[SourceInput],
    config: &PipelineConfig,
    threshold_minutes: i64,
) -> Result<Vec<GlucoseGap>, ComputeError> {
    let fused = fuse_sources(sources, config)?;
    Ok(GapHandler::find_glucose_gaps(&fused, threshold_minutes))
}

/// Parse newline-delimited JSON readings (blank lines skipped)
pub fn parse_readings_ndjson(raw: &str) -> Result<Vec<Reading>, ComputeError> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(ComputeError::from))
        .collect()
}

/// Stateful processor holding the fitted scaler between dataset preparation
/// and serving.
///
/// Use this when forecasts are served from the same process that prepared the
/// data, or after restoring a saved scaler.
pub struct GlucoseProcessor {
    config: PipelineConfig,
    scaler: MinMaxScaler,
    model: Box<dyn GlucoseModel>,
}

impl GlucoseProcessor {
    /// Processor with the persistence baseline model
    pub fn new(config: PipelineConfig) -> Result<Self, ComputeError> {
        Self::with_model(config, Box::new(PersistenceModel))
    }

    pub fn with_model(
        config: PipelineConfig,
        model: Box<dyn GlucoseModel>,
    ) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            scaler: MinMaxScaler::new(),
            model,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    /// Build the dataset and keep its scaler for serving
    pub fn prepare(&mut self, sources: &[SourceInput]) -> Result<PartitionedDataset, ComputeError> {
        let dataset = prepare_dataset(sources, &self.config)?;
        self.scaler = dataset.scaler().clone();
        Ok(dataset)
    }

    /// Load scaler state from JSON
    pub fn load_scaler(&mut self, json: &str) -> Result<(), ComputeError> {
        self.scaler = MinMaxScaler::load(json)?;
        Ok(())
    }

    /// Save scaler state to JSON
    pub fn save_scaler(&self) -> Result<String, ComputeError> {
        self.scaler.save()
    }

    /// Forecast from recent readings
    pub fn predict(&self, past_readings: &[Reading]) -> Result<Prediction, ComputeError> {
        predict_window(past_readings, &self.config, &self.scaler, self.model.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CutoverRule, MMOL_TO_MGDL};
    use crate::forecast::Action;
    use crate::types::{Column, SourceKind};
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn glucose_at(i: usize) -> f64 {
        let g = 7.0 + 2.5 * (i as f64 / 12.0).sin();
        (g * 10.0).round() / 10.0
    }

    /// Four days of reader data every 15 minutes, with a reader-logged dose
    /// on each day at noon
    fn sample_reader_export() -> String {
        let mut tsv = String::from(
            "Time\tHistoric Glucose (mmol/L)\tRapid-Acting Insulin (units)\tCarbohydrates (grams)\n",
        );
        for i in 0..(4 * 96) {
            let time = day(6) + Duration::minutes(15 * i as i64);
            let noon = i % 96 == 48;
            tsv.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                time.format("%Y/%m/%d %H:%M"),
                glucose_at(i),
                if noon { "3" } else { "" },
                if noon { "30" } else { "" },
            ));
        }
        tsv
    }

    fn sample_manual_log() -> String {
        let mut csv = String::from(
            "Date,Time,Basal Injection Units,Insulin (Meal),Insulin (Correction),\"Meal Carbohydrates (Grams, Factor 1)\",Meal Descriptions\n",
        );
        for d in 6..10 {
            csv.push_str(&format!("\"Jan {d}, 2022\",8:05:00 AM,,5,,50,Medium\n"));
            csv.push_str(&format!("\"Jan {d}, 2022\",10:00:00 PM,16,,,,\n"));
        }
        csv
    }

    fn sample_heart_rate() -> String {
        (0..8)
            .map(|m| {
                format!(
                    "{{\"dateTime\":\"01/06/22 09:{:02}:00\",\"value\":{{\"bpm\":{},\"confidence\":2}}}}\n",
                    m * 5,
                    70 + m
                )
            })
            .collect()
    }

    fn sources() -> Vec<SourceInput> {
        vec![
            SourceInput::new(SourceFormat::LibreTsv, sample_reader_export()),
            SourceInput::new(SourceFormat::MySugrCsv, sample_manual_log()),
            SourceInput::new(SourceFormat::FitbitHeartRate, sample_heart_rate()),
        ]
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.cutover.push(CutoverRule::new(SourceKind::Libre, day(8)));
        config
    }

    #[test]
    fn test_build_features_applies_cutover() {
        let frame = build_features(&sources(), &config()).unwrap();
        assert_eq!(frame.len(), 4 * 96);
        assert_eq!(frame.times()[0], day(6));

        let rapid = frame.column(Column::RapidInsulin).unwrap();
        // 08:00 bin holds the manual-log meal bolus
        assert_eq!(rapid[32], Some(5.0));
        // Reader dose before the cutover counts, after it does not
        assert_eq!(rapid[48], Some(3.0));
        assert_eq!(rapid[2 * 96 + 48], Some(0.0));

        let carbs = frame.column(Column::Carbohydrates).unwrap();
        assert_eq!(carbs[32], Some(50.0));
        assert_eq!(frame.column(Column::GlycemicLoad).unwrap()[32], Some(22.5));

        // Basal at 22:00 carried into the next morning
        let long = frame.column(Column::LongInsulin).unwrap();
        assert_eq!(long[88], Some(16.0));
        assert_eq!(long[96 + 20], Some(16.0));

        let heart_rate = frame.column(Column::HeartRate).unwrap();
        assert_eq!(heart_rate[36], Some(71.0));
        assert_eq!(heart_rate[37], Some(74.0));
        assert_eq!(heart_rate[39], None);

        let iob = frame.column(Column::InsulinOnBoard).unwrap();
        assert_eq!(iob[31], Some(0.0));
        assert_eq!(iob[32], Some(5.0));
        assert!(iob.iter().all(|v| v.is_some_and(|v| v >= 0.0)));
    }

    #[test]
    fn test_prepare_dataset_end_to_end() {
        let dataset = prepare_dataset(&sources(), &config()).unwrap();

        assert_eq!(dataset.train.len(), 268);
        assert_eq!(dataset.validation.len(), 77);
        assert_eq!(dataset.test.len(), 39);
        assert!(dataset.train.times().last() < dataset.validation.times().first());

        for v in dataset.train.column(Column::Glucose).unwrap().iter().flatten() {
            assert!((0.0..=1.0).contains(v));
        }

        let windows = dataset.test_windows(&config().forecast);
        assert_eq!(windows.len(), 12);
        assert_eq!(windows[0].window.shape(), (20, 3));
    }

    #[test]
    fn test_prepare_dataset_schema_error() {
        let bad = vec![SourceInput::new(
            SourceFormat::LibreTsv,
            "Time\tScan Glucose (mmol/L)\n2022/01/06 00:00\t6.1\n",
        )];
        let err = prepare_dataset(&bad, &config()).unwrap_err();
        assert!(matches!(err, ComputeError::Schema { .. }));
    }

    #[test]
    fn test_unvalidated_config_is_rejected() {
        let mut zero_bins = config();
        zero_bins.sampling.bin_minutes = 0;
        let err = build_features(&sources(), &zero_bins).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidConfig(_)));

        let mut long_window = config();
        long_window.insulin.rolling_days = 3_000_000;
        let err = prepare_dataset(&sources(), &long_window).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidConfig(_)));
    }

    #[test]
    fn test_glucose_gaps_report() {
        let tsv = "Time\tHistoric Glucose (mmol/L)\n\
                   2022/01/06 00:00\t6.0\n\
                   2022/01/06 00:15\t6.1\n\
                   2022/01/06 01:30\t6.4\n";
        let gaps = glucose_gaps(
            &[SourceInput::new(SourceFormat::LibreTsv, tsv)],
            &config(),
            20,
        )
        .unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].minutes, 75);
    }

    #[test]
    fn test_processor_prepare_then_predict() {
        let mut processor = GlucoseProcessor::new(config()).unwrap();
        assert!(matches!(
            processor.save_scaler(),
            Err(ComputeError::NotFitted)
        ));
        processor.prepare(&sources()).unwrap();

        let readings = read_source(SourceFormat::LibreTsv, &sample_reader_export())
            .unwrap()
            .readings;
        let past = &readings[readings.len() - 24..];
        let prediction = processor.predict(past).unwrap();

        let last = past[past.len() - 1].glucose.unwrap();
        assert!((prediction.predicted_glucose - last * MMOL_TO_MGDL).abs() < 1e-6);
        assert_eq!(prediction.action, Action::from_mgdl(last * MMOL_TO_MGDL));

        // A restored scaler serves the same forecast
        let mut restored = GlucoseProcessor::new(config()).unwrap();
        restored.load_scaler(&processor.save_scaler().unwrap()).unwrap();
        let served = restored.predict(past).unwrap();
        assert!((served.predicted_glucose - prediction.predicted_glucose).abs() < 1e-9);
        assert_eq!(served.action, prediction.action);
    }

    #[test]
    fn test_parse_readings_ndjson() {
        let raw = r#"
{"time":"2022-01-06T08:00:00","source":"libre","glucose":6.2}
{"time":"2022-01-06T08:05:00","source":"my_sugr","rapid_insulin":4.0,"carbohydrates":40.0,"glycemic_index":"high"}
"#;
        let readings = parse_readings_ndjson(raw).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].source, SourceKind::MySugr);
        assert_eq!(readings[1].rapid_insulin, Some(4.0));
        assert!(parse_readings_ndjson("{oops").is_err());
    }
}
