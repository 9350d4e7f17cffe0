//! Gluco Flux CLI - Command-line interface for Gluco Flux
//!
//! Commands:
//! - prepare: Build the partitioned, normalized dataset from configured exports
//! - gaps: Report glucose recording gaps
//! - predict: Forecast glucose from recent readings with a saved scaler
//! - config: Print or check a pipeline configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

use gluco_flux::gaps::GlucoseGap;
use gluco_flux::pipeline::{glucose_gaps, load_sources, parse_readings_ndjson};
use gluco_flux::{
    prepare_dataset, ComputeError, GlucoseProcessor, PipelineConfig, Prediction, FLUX_VERSION,
    PRODUCER_NAME,
};

/// Gluco Flux - glucose forecasting feature pipeline
#[derive(Parser)]
#[command(name = "gflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Fuse glucose, insulin and wearable exports into forecast-ready features", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build train/validation/test tables and the fitted scaler
    Prepare {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Output summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report glucose recording gaps
    Gaps {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Minimum gap length in minutes
        #[arg(long, default_value = "20")]
        threshold_minutes: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forecast glucose from recent readings
    Predict {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Scaler saved by `prepare`
        #[arg(short, long)]
        scaler: PathBuf,

        /// Readings as NDJSON (use - for stdin)
        #[arg(short, long)]
        readings: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to validate and print
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; `RUST_LOG` directives are added on top of the default
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = format!("gluco_flux={level}").parse() {
        filter = filter.add_directive(d);
    }
    if let Ok(d) = format!("gflux={level}").parse() {
        filter = filter.add_directive(d);
    }

    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Prepare {
            config,
            out_dir,
            json,
        } => cmd_prepare(&config, &out_dir, json),

        Commands::Gaps {
            config,
            threshold_minutes,
            json,
        } => cmd_gaps(&config, threshold_minutes, json),

        Commands::Predict {
            config,
            scaler,
            readings,
            output_format,
        } => cmd_predict(&config, &scaler, &readings, output_format),

        Commands::Config { check } => cmd_config(check.as_deref()),
    }
}

fn cmd_prepare(config_path: &Path, out_dir: &Path, json: bool) -> Result<(), FluxCliError> {
    let config = PipelineConfig::from_path(config_path)?;
    if config.sources.is_empty() {
        return Err(FluxCliError::NoSources);
    }
    let sources = load_sources(&config)?;
    let dataset = prepare_dataset(&sources, &config)?;
    let files = dataset.write_to_dir(out_dir, &config.forecast)?;

    let report = PrepareReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        run_id: dataset.scaler().artifact()?.run_id.to_string(),
        train_rows: dataset.train.len(),
        validation_rows: dataset.validation.len(),
        test_rows: dataset.test.len(),
        test_windows: dataset.test_windows(&config.forecast).len(),
        files: vec![
            files.train,
            files.validation,
            files.test,
            files.test_windows,
            files.scaler,
        ],
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Dataset {}", report.run_id);
        println!("===========================================");
        println!("Train rows:      {}", report.train_rows);
        println!("Validation rows: {}", report.validation_rows);
        println!("Test rows:       {}", report.test_rows);
        println!("Test windows:    {}", report.test_windows);
        println!("\nFiles:");
        for file in &report.files {
            println!("  - {}", file.display());
        }
    }
    Ok(())
}

fn cmd_gaps(config_path: &Path, threshold_minutes: i64, json: bool) -> Result<(), FluxCliError> {
    let config = PipelineConfig::from_path(config_path)?;
    if config.sources.is_empty() {
        return Err(FluxCliError::NoSources);
    }
    let sources = load_sources(&config)?;
    let gaps = glucose_gaps(&sources, &config, threshold_minutes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&gaps)?);
        return Ok(());
    }

    println!("Glucose gaps over {threshold_minutes} minutes: {}", gaps.len());
    for GlucoseGap {
        start,
        end,
        minutes,
    } in &gaps
    {
        println!("  {start} -> {end} ({minutes} min)");
    }
    if let Some(total) = gaps.iter().map(|g| g.minutes).reduce(|a, b| a + b) {
        println!("Total missing: {total} min");
    }
    Ok(())
}

fn cmd_predict(
    config_path: &Path,
    scaler_path: &Path,
    readings_path: &Path,
    output_format: OutputFormat,
) -> Result<(), FluxCliError> {
    let config = PipelineConfig::from_path(config_path)?;
    let mut processor = GlucoseProcessor::new(config)?;
    processor.load_scaler(&fs::read_to_string(scaler_path)?)?;

    let input_data = if readings_path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(readings_path)?
    };
    let readings = parse_readings_ndjson(&input_data)?;
    if readings.is_empty() {
        return Err(FluxCliError::NoReadings);
    }

    let prediction = processor.predict(&readings)?;
    println!("{}", format_output(&prediction, &output_format)?);
    Ok(())
}

fn cmd_config(check: Option<&Path>) -> Result<(), FluxCliError> {
    let config = match check {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

// Helper functions

fn format_output(prediction: &Prediction, format: &OutputFormat) -> Result<String, FluxCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(prediction)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(prediction)?),
    }
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoSources,
    NoReadings,
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<ComputeError> for FluxCliError {
    fn from(e: ComputeError) -> Self {
        FluxCliError::Compute(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Compute(e) => {
                let (code, hint) = compute_error_code(&e);
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::NoSources => CliError {
                code: "NO_SOURCES".to_string(),
                message: "Configuration lists no source files".to_string(),
                hint: Some("Add [[sources]] entries with format and path".to_string()),
            },
            FluxCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
        }
    }
}

fn compute_error_code(e: &ComputeError) -> (&'static str, &'static str) {
    match e {
        ComputeError::Schema { .. } => (
            "SCHEMA_ERROR",
            "Check that the source format matches the export file",
        ),
        ComputeError::EmptyDataset(_) => (
            "EMPTY_DATASET",
            "Check source files and the configured date range",
        ),
        ComputeError::NotFitted => ("NOT_FITTED", "Run 'gflux prepare' to produce a scaler"),
        ComputeError::InvalidConfig(_) | ComputeError::TomlError(_) => (
            "CONFIG_ERROR",
            "Run 'gflux config' to see the default configuration",
        ),
        ComputeError::IncompleteWindow(_) => (
            "INCOMPLETE_WINDOW",
            "Provide readings covering the full forecast window",
        ),
        ComputeError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
        _ => ("PARSE_ERROR", "Check input format"),
    }
}

// Report types

#[derive(serde::Serialize)]
struct PrepareReport {
    producer: String,
    version: String,
    run_id: String,
    train_rows: usize,
    validation_rows: usize,
    test_rows: usize,
    test_windows: usize,
    files: Vec<PathBuf>,
}
