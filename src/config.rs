//! Configuration loading with Figment.
//!
//! Configuration is layered, later sources winning:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `NODE_TELEMETRY_`, using `__` between
//!    section and key (e.g. `NODE_TELEMETRY_TRACE__RESISTANCE_OHMS=4.7`)
//!
//! # Example
//! ```no_run
//! use node_telemetry::config::AppConfig;
//! use std::path::Path;
//!
//! let config = AppConfig::load(Some(Path::new("config/node_telemetry.toml")))?;
//! config.validate()?;
//! println!("dialect: {:?}", config.nodes.dialect);
//! # Ok::<(), node_telemetry::TelemetryError>(())
//! ```

use crate::data::iir_filter::{FilterMode, LowpassConfig, MAX_ORDER};
use crate::error::{Result, TelemetryError};
use crate::logging::{parse_log_level, OutputFormat};
use crate::record::Dialect;
use crate::validation::{is_finite, is_in_range, is_non_zero, is_positive_finite};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "NODE_TELEMETRY_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Diagnostic logging
    pub log: LogConfig,
    /// Node log reduction
    pub nodes: NodeLogConfig,
    /// METER logger reduction
    pub meter: MeterConfig,
    /// Current trace analysis
    pub trace: TraceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format on stderr
    pub format: OutputFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::default(),
        }
    }
}

/// Format of reduced node tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TableFormat {
    /// Comma-separated rows with a header.
    #[default]
    Csv,
    /// One JSON object per line.
    JsonLines,
}

/// Node log reduction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLogConfig {
    /// Log dialect
    pub dialect: Dialect,
    /// Decimation interval in minutes, 0 keeps every observation
    pub interval_minutes: u32,
    /// Emit on every change of hour instead of on interval buckets
    pub hourly: bool,
    /// Retry implausible timestamps as epoch milliseconds
    pub rescale_millis: bool,
    /// Output table format
    pub format: TableFormat,
}

impl Default for NodeLogConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::HelloV2,
            interval_minutes: 0,
            hourly: false,
            rescale_millis: true,
            format: TableFormat::Csv,
        }
    }
}

/// METER logger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Emit on minutes that are a multiple of this interval
    pub interval_minutes: u32,
    /// Clock correction added to every recorded time
    pub offset_seconds: i64,
    /// Header lines echoed before the data rows
    pub header_lines: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            offset_seconds: 354_049_200,
            header_lines: 3,
        }
    }
}

/// Oscilloscope trace settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Vendor metadata rows before the samples
    pub skip_rows: usize,
    /// Seconds between samples
    pub delta_t: f64,
    /// Samples at or below this are treated as idle; also the filter noise floor
    pub zero_threshold: f64,
    /// Sense resistor in ohms
    pub resistance_ohms: f64,
    /// Constant added to every raw sample before charge analysis
    pub voltage_offset: f64,
    /// Low-pass cutoff in Hz
    pub cutoff_hz: f64,
    /// Filter sample rate; `1 / delta_t` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<f64>,
    /// Butterworth order
    pub order: usize,
    /// Causal or zero-phase filtering
    pub mode: FilterMode,
    /// Amps to output unit (1000 for mA)
    pub unit_scale: f64,
    /// Row stride for the thinned plot series
    pub sample_every: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            skip_rows: 12,
            delta_t: 0.000_005,
            zero_threshold: 0.000_15,
            resistance_ohms: 2.2,
            voltage_offset: 0.0,
            cutoff_hz: 1000.0,
            sample_rate_hz: None,
            order: 4,
            mode: FilterMode::Causal,
            unit_scale: 1000.0,
            sample_every: 1000,
        }
    }
}

impl TraceConfig {
    /// Effective filter sample rate.
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate_hz.unwrap_or(1.0 / self.delta_t)
    }

    /// Filter design parameters for this trace.
    #[must_use]
    pub fn to_lowpass_config(&self) -> LowpassConfig {
        LowpassConfig {
            cutoff_hz: self.cutoff_hz,
            sample_rate_hz: self.sample_rate(),
            order: self.order,
            mode: self.mode,
            noise_floor: self.zero_threshold,
        }
    }

    fn validate(&self) -> Result<()> {
        check("trace.delta_t", is_positive_finite(self.delta_t))?;
        check("trace.resistance_ohms", is_positive_finite(self.resistance_ohms))?;
        check("trace.cutoff_hz", is_positive_finite(self.cutoff_hz))?;
        check("trace.sample_rate_hz", is_positive_finite(self.sample_rate()))?;
        check("trace.zero_threshold", is_finite(self.zero_threshold))?;
        check("trace.voltage_offset", is_finite(self.voltage_offset))?;
        check("trace.unit_scale", is_finite(self.unit_scale))?;
        check("trace.order", is_in_range(self.order, 1..=MAX_ORDER))?;
        check("trace.sample_every", is_non_zero(self.sample_every))?;

        let nyquist = self.sample_rate() / 2.0;
        if self.cutoff_hz >= nyquist {
            return Err(TelemetryError::Configuration(format!(
                "trace.cutoff_hz {} must be below the Nyquist frequency {nyquist} Hz",
                self.cutoff_hz
            )));
        }
        Ok(())
    }
}

fn check(key: &str, outcome: std::result::Result<(), &'static str>) -> Result<()> {
    outcome.map_err(|reason| TelemetryError::Configuration(format!("{key}: {reason}")))
}

impl AppConfig {
    /// Builds the layered provider without extracting it.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// A named file that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(TelemetryError::Configuration(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
        }
        let config: Self = Self::figment(path).extract()?;
        tracing::debug!(?path, "Loaded configuration");
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.log.level)?;
        check(
            "nodes.interval_minutes",
            is_in_range(self.nodes.interval_minutes, 0..=60),
        )?;
        check(
            "meter.interval_minutes",
            is_in_range(self.meter.interval_minutes, 0..=60),
        )?;
        self.trace.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nodes.dialect, Dialect::HelloV2);
        assert_eq!(config.meter.offset_seconds, 354_049_200);
        assert_eq!(config.trace.skip_rows, 12);
    }

    #[test]
    fn test_sample_rate_follows_delta_t() {
        let trace = TraceConfig::default();
        assert!((trace.sample_rate() - 200_000.0).abs() < 1e-6);
        let explicit = TraceConfig {
            sample_rate_hz: Some(50_000.0),
            ..TraceConfig::default()
        };
        assert_eq!(explicit.sample_rate(), 50_000.0);
        assert_eq!(explicit.to_lowpass_config().noise_floor, 0.000_15);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[nodes]\ndialect = \"leaf-sd\"\ninterval_minutes = 15\n\n[trace]\nresistance_ohms = 4.7\nmode = \"zero-phase\""
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.nodes.dialect, Dialect::LeafSd);
        assert_eq!(config.nodes.interval_minutes, 15);
        assert_eq!(config.trace.resistance_ohms, 4.7);
        assert_eq!(config.trace.mode, FilterMode::ZeroPhase);
        // Unset keys keep their defaults.
        assert_eq!(config.trace.order, 4);
        assert!(config.nodes.rescale_millis);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/node_telemetry.toml")));
        assert!(matches!(result, Err(TelemetryError::Configuration(_))));
    }

    #[test]
    fn test_type_mismatch_is_figment_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[trace]\norder = \"four\"").unwrap();
        let result = AppConfig::load(Some(file.path()));
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.log.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_out_of_range() {
        let mut config = AppConfig::default();
        config.nodes.interval_minutes = 61;
        assert!(config.validate().is_err());
        config.nodes.interval_minutes = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trace_validation() {
        let cases: [fn(&mut TraceConfig); 8] = [
            |t| t.delta_t = 0.0,
            |t| t.resistance_ohms = -2.2,
            |t| t.cutoff_hz = f64::NAN,
            |t| t.cutoff_hz = 100_000.0,
            |t| t.order = 0,
            |t| t.order = MAX_ORDER + 1,
            |t| t.sample_every = 0,
            |t| t.sample_rate_hz = Some(0.0),
        ];
        for (i, mutate) in cases.into_iter().enumerate() {
            let mut config = AppConfig::default();
            mutate(&mut config.trace);
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, TelemetryError::Configuration(_)),
                "case {i}: {err:?}"
            );
        }
    }
}
