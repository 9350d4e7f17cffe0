//! Error types for Gluco Flux

use thiserror::Error;

use crate::types::SourceKind;

/// Errors that can occur while building or serving the feature pipeline
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Missing required column '{column}' in {kind} export")]
    Schema { kind: SourceKind, column: String },

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Scaler has not been fitted")]
    NotFitted,

    #[error("Failed to parse source payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid delimited data: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Incomplete feature window: {0}")]
    IncompleteWindow(String),

    #[error("Prediction failed: {0}")]
    PredictionError(String),
}
