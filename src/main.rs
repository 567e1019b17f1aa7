//! CLI entry point for node-telemetry
//!
//! Provides commands for:
//! - Reducing sensor node logs to decimated tables (`nodes`)
//! - Reducing METER soil logger exports with clock correction (`meter`)
//! - Integrating oscilloscope current traces into charge (`charge`)
//! - Thinning traces for plotting (`sample`)
//!
//! # Usage
//!
//! ```bash
//! node-telemetry nodes receiver.log --dialect hello-v1 --interval 15
//! node-telemetry --config config/node_telemetry.toml charge scope.csv --json
//! ```
//!
//! Reduced data goes to stdout unless `--output` is given; diagnostics go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use node_telemetry::config::{AppConfig, TableFormat};
use node_telemetry::data::integrator::IntegrationResult;
use node_telemetry::data::iir_filter::FilterMode;
use node_telemetry::data::storage::{CsvWriter, JsonLinesWriter, StorageWriter};
use node_telemetry::logging::{self, TracingConfig};
use node_telemetry::pipeline;
use node_telemetry::record::Dialect;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "node-telemetry")]
#[command(about = "Reduce sensor node telemetry and current traces", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce a node log to a decimated table
    Nodes {
        /// Node log file
        file: PathBuf,
        /// Log dialect
        #[arg(long, value_enum)]
        dialect: Option<Dialect>,
        /// Decimation interval in minutes (0 keeps everything)
        #[arg(long)]
        interval: Option<u32>,
        /// Emit once per hour change
        #[arg(long)]
        hourly: bool,
        /// Do not retry implausible timestamps as milliseconds
        #[arg(long)]
        no_rescale: bool,
        /// Output table format
        #[arg(long, value_enum)]
        format: Option<TableFormat>,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Reduce a METER logger export
    Meter {
        /// Logger CSV file
        file: PathBuf,
        /// Emit on minutes that are multiples of this interval
        #[arg(long)]
        interval: Option<u32>,
        /// Clock correction in seconds
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,
        /// Header lines to echo
        #[arg(long)]
        header_lines: Option<usize>,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Filter and integrate a current trace
    Charge {
        /// Scope CSV export
        file: PathBuf,
        #[command(flatten)]
        trace: TraceArgs,
        /// Butterworth order
        #[arg(long)]
        order: Option<usize>,
        /// Filter mode
        #[arg(long, value_enum)]
        mode: Option<FilterMode>,
        /// Low-pass cutoff in Hz
        #[arg(long)]
        cutoff: Option<f64>,
        /// Filter sample rate in Hz (defaults to 1 / delta-t)
        #[arg(long)]
        sample_rate: Option<f64>,
        /// Sense resistance in ohms
        #[arg(long)]
        resistance: Option<f64>,
        /// Constant added to every raw sample
        #[arg(long, allow_hyphen_values = true)]
        voltage_offset: Option<f64>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Thin a trace to every Nth row for plotting
    Sample {
        /// Scope CSV export
        file: PathBuf,
        #[command(flatten)]
        trace: TraceArgs,
        /// Keep rows whose line number is a multiple of this
        #[arg(long)]
        every: Option<usize>,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Trace flags shared by `charge` and `sample`.
#[derive(clap::Args)]
struct TraceArgs {
    /// Metadata rows to skip
    #[arg(long)]
    skip: Option<usize>,
    /// Seconds between samples
    #[arg(long)]
    delta_t: Option<f64>,
    /// Zero threshold
    #[arg(long)]
    zero: Option<f64>,
}

impl TraceArgs {
    fn apply(&self, config: &mut AppConfig) {
        let trace = &mut config.trace;
        if let Some(skip) = self.skip {
            trace.skip_rows = skip;
        }
        if let Some(delta_t) = self.delta_t {
            trace.delta_t = delta_t;
        }
        if let Some(zero) = self.zero {
            trace.zero_threshold = zero;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    apply_overrides(&cli.command, &mut config);
    config.validate().context("validating configuration")?;
    logging::init(TracingConfig::from_log_config(&config.log)?)?;

    match &cli.command {
        Commands::Nodes { file, output, .. } => {
            let reader = BufReader::new(open(file)?);
            let out = output_stream(output.as_deref())?;
            let stats = match config.nodes.format {
                TableFormat::Csv => {
                    pipeline::reduce_node_log(reader, &config.nodes, &mut CsvWriter::new(out))?
                }
                TableFormat::JsonLines => pipeline::reduce_node_log(
                    reader,
                    &config.nodes,
                    &mut JsonLinesWriter::new(out),
                )?,
            };
            info!(?stats, file = %file.display(), "Done");
        }
        Commands::Meter { file, output, .. } => {
            let reader = BufReader::new(open(file)?);
            let mut writer = CsvWriter::new(output_stream(output.as_deref())?);
            let stats = pipeline::reduce_meter(reader, &config.meter, &mut writer)?;
            info!(?stats, file = %file.display(), "Done");
        }
        Commands::Charge { file, json, .. } => {
            let result = pipeline::analyze_trace(BufReader::new(open(file)?), &config.trace)?;
            let out = output_stream(None)?;
            if *json {
                write_summary(&mut JsonLinesWriter::new(out), &result)?;
            } else {
                write_summary(&mut CsvWriter::new(out), &result)?;
            }
        }
        Commands::Sample { file, output, .. } => {
            let mut writer = CsvWriter::new(output_stream(output.as_deref())?);
            let rows = pipeline::sample_trace(open(file)?, &config.trace, &mut writer)?;
            info!(rows, file = %file.display(), "Done");
        }
    }
    Ok(())
}

fn apply_overrides(command: &Commands, config: &mut AppConfig) {
    match command {
        Commands::Nodes {
            dialect,
            interval,
            hourly,
            no_rescale,
            format,
            ..
        } => {
            let nodes = &mut config.nodes;
            if let Some(dialect) = dialect {
                nodes.dialect = *dialect;
            }
            if let Some(interval) = interval {
                nodes.interval_minutes = *interval;
            }
            nodes.hourly |= *hourly;
            if *no_rescale {
                nodes.rescale_millis = false;
            }
            if let Some(format) = format {
                nodes.format = *format;
            }
        }
        Commands::Meter {
            interval,
            offset,
            header_lines,
            ..
        } => {
            let meter = &mut config.meter;
            if let Some(interval) = interval {
                meter.interval_minutes = *interval;
            }
            if let Some(offset) = offset {
                meter.offset_seconds = *offset;
            }
            if let Some(lines) = header_lines {
                meter.header_lines = *lines;
            }
        }
        Commands::Charge {
            trace,
            order,
            mode,
            cutoff,
            sample_rate,
            resistance,
            voltage_offset,
            ..
        } => {
            trace.apply(config);
            let trace = &mut config.trace;
            if let Some(order) = order {
                trace.order = *order;
            }
            if let Some(mode) = mode {
                trace.mode = *mode;
            }
            if let Some(cutoff) = cutoff {
                trace.cutoff_hz = *cutoff;
            }
            if sample_rate.is_some() {
                trace.sample_rate_hz = *sample_rate;
            }
            if let Some(resistance) = resistance {
                trace.resistance_ohms = *resistance;
            }
            if let Some(offset) = voltage_offset {
                trace.voltage_offset = *offset;
            }
        }
        Commands::Sample { trace, every, .. } => {
            trace.apply(config);
            if let Some(every) = every {
                config.trace.sample_every = *every;
            }
        }
    }
}

fn write_summary<W: StorageWriter>(writer: &mut W, result: &IntegrationResult) -> Result<()> {
    writer.write_header(&IntegrationResult::SUMMARY_COLUMNS)?;
    writer.write_row(result)?;
    writer.shutdown()?;
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("opening {}", path.display()))
}

fn output_stream(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}
