//! Gluco Flux - Glucose forecasting feature pipeline
//!
//! Gluco Flux turns glucose reader, manual insulin/carbohydrate log and
//! wearable exports into a fixed-frequency feature table through a
//! deterministic pipeline: source adaptation → fusion → resampling → feature
//! derivation (including insulin on board) → gap handling → normalization.
//!
//! ## Modules
//!
//! - **Dataset preparation**: raw exports to normalized train/validation/test partitions
//! - **Serving**: recent readings to a glucose forecast with an action recommendation

pub mod adapters;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod forecast;
pub mod fusion;
pub mod gaps;
pub mod insulin;
pub mod normalizer;
pub mod pipeline;
pub mod resample;
pub mod types;

pub use config::{PipelineConfig, MMOL_TO_MGDL};
pub use dataset::PartitionedDataset;
pub use error::ComputeError;
pub use forecast::{predict_window, Action, GlucoseModel, PersistenceModel, Prediction};
pub use insulin::InsulinCurve;
pub use normalizer::MinMaxScaler;
pub use pipeline::{load_sources, prepare_dataset, GlucoseProcessor, SourceInput};
pub use types::{Column, Reading, SourceKind};

/// Crate version recorded by the CLI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "gluco-flux";
