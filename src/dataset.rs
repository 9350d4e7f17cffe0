//! Partitioned dataset
//!
//! Train, validation and test partitions in normalized units together with
//! the scaler fitted on train, plus delimited-table export.

use csv::Writer;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{ForecastConfig, PipelineConfig};
use crate::error::ComputeError;
use crate::forecast::{training_windows, TrainingExample};
use crate::gaps::GapHandler;
use crate::normalizer::MinMaxScaler;
use crate::resample::ResampledFrame;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalized partitions and the scaler that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedDataset {
    pub train: ResampledFrame,
    pub validation: ResampledFrame,
    pub test: ResampledFrame,
    scaler: MinMaxScaler,
}

/// Paths written by `PartitionedDataset::write_to_dir`
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFiles {
    pub train: PathBuf,
    pub validation: PathBuf,
    pub test: PathBuf,
    pub test_windows: PathBuf,
    pub scaler: PathBuf,
}

impl PartitionedDataset {
    /// Split a derived frame, fill train/validation gaps, fit the scaler on
    /// train and scale all three partitions
    pub fn from_frame(
        frame: &ResampledFrame,
        config: &PipelineConfig,
    ) -> Result<Self, ComputeError> {
        let parts = GapHandler::partition(frame, &config.split, &config.gaps)?;

        let mut scaler = MinMaxScaler::new();
        scaler.fit(&parts.train)?;

        let dataset = Self {
            train: scaler.transform(&parts.train)?,
            validation: scaler.transform(&parts.validation)?,
            test: scaler.transform(&parts.test)?,
            scaler,
        };
        tracing::info!(
            train = dataset.train.len(),
            validation = dataset.validation.len(),
            test = dataset.test.len(),
            "partitioned dataset"
        );
        Ok(dataset)
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    pub fn into_scaler(self) -> MinMaxScaler {
        self.scaler
    }

    /// Model windows over the test partition
    pub fn test_windows(&self, forecast: &ForecastConfig) -> Vec<TrainingExample> {
        training_windows(&self.test, forecast)
    }

    /// Write the partitions, the test windows and the scaler into `dir`
    pub fn write_to_dir(
        &self,
        dir: &Path,
        forecast: &ForecastConfig,
    ) -> Result<DatasetFiles, ComputeError> {
        fs::create_dir_all(dir)?;
        let files = DatasetFiles {
            train: dir.join("train.csv"),
            validation: dir.join("validation.csv"),
            test: dir.join("test.csv"),
            test_windows: dir.join("windows_test.csv"),
            scaler: dir.join("scaler.json"),
        };

        write_frame_csv(&self.train, fs::File::create(&files.train)?)?;
        write_frame_csv(&self.validation, fs::File::create(&files.validation)?)?;
        write_frame_csv(&self.test, fs::File::create(&files.test)?)?;
        write_windows_csv(
            &self.test_windows(forecast),
            fs::File::create(&files.test_windows)?,
        )?;
        fs::write(&files.scaler, self.scaler.save()?)?;

        tracing::info!(dir = %dir.display(), "wrote dataset");
        Ok(files)
    }
}

/// One row per grid slot: `time` then every column; missing cells are empty
pub fn write_frame_csv<W: io::Write>(
    frame: &ResampledFrame,
    writer: W,
) -> Result<(), ComputeError> {
    let columns = frame.column_names();
    let mut wtr = Writer::from_writer(writer);

    let mut header = vec!["time".to_string()];
    header.extend(columns.iter().map(|c| c.to_string()));
    wtr.write_record(&header)?;

    for (row, time) in frame.times().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(time.format(TIME_FORMAT).to_string());
        for &column in &columns {
            let value = frame.require(column)?[row];
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// One row per window timestep, grouped by `example_id`, with the window's
/// target time and value repeated on each row
pub fn write_windows_csv<W: io::Write>(
    examples: &[TrainingExample],
    writer: W,
) -> Result<(), ComputeError> {
    let mut wtr = Writer::from_writer(writer);
    let Some(first) = examples.first() else {
        wtr.flush()?;
        return Ok(());
    };

    let mut header = vec!["example_id".to_string(), "step".to_string()];
    header.extend(first.window.channels.iter().map(|c| c.to_string()));
    header.push("target_time".to_string());
    header.push("target".to_string());
    wtr.write_record(&header)?;

    for (id, example) in examples.iter().enumerate() {
        let target_time = example.target_time.format(TIME_FORMAT).to_string();
        for (step, row) in example.window.values.iter().enumerate() {
            let mut record = vec![id.to_string(), step.to_string()];
            record.extend(row.iter().map(|v| v.to_string()));
            record.push(target_time.clone());
            record.push(example.target.to_string());
            wtr.write_record(&record)?;
        }
    }
    wtr.flush()?;
    Ok(())
}
