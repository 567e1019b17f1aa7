//! Custom error types for the application.
//!
//! This module defines `TelemetryError`, the error type shared by every stage of the
//! reduction pipeline. Using the `thiserror` crate, it gives one consistent way to report
//! problems ranging from unreadable input files to traces that never rise above the
//! noise floor.
//!
//! ## Error Hierarchy
//!
//! - **`MalformedRecord`**: a log line or trace row that could not be decoded. The node-log
//!   driver treats these as routine and skips them after logging; the trace loader treats
//!   them as fatal because a missing row would shift every later sample in time.
//! - **`ImplausibleTimestamp`**: an epoch value outside the accepted calendar range. Callers
//!   usually retry the record as epoch milliseconds.
//! - **`EmptyResult`**: an integration pass found no sample above the threshold.
//! - **`Io`**, **`Csv`**, **`Json`**: failures reading input or writing reduced output.
//! - **`Config`** and **`Configuration`**: loading failures from `figment`, and semantic
//!   validation failures for values that parsed but make no sense.
//! - **`Filter`**: the low-pass filter could not be designed for the requested parameters.
//!
//! Per-line parse outcomes have their own small enum, [`crate::record::ParseFailure`], which
//! is wrapped into `MalformedRecord` together with the line number.

use crate::record::ParseFailure;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while reducing telemetry logs or analysing current traces.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A record could not be decoded.
    #[error("Malformed record at line {line}: {source}")]
    MalformedRecord {
        /// 1-based line number in the input.
        line: usize,
        /// Why the record was rejected.
        #[source]
        source: ParseFailure,
    },

    /// An epoch value fell outside the accepted calendar range.
    #[error("Implausible timestamp {0} (epoch milliseconds?)")]
    ImplausibleTimestamp(i64),

    /// No trace sample exceeded the integration threshold.
    #[error("No samples above threshold {threshold} in a trace of {samples} samples")]
    EmptyResult {
        /// Number of samples scanned.
        samples: usize,
        /// Threshold that none of them exceeded.
        threshold: f64,
    },

    /// I/O failure on an input or output stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but contains invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filter design failure.
    #[error("Filter design error: {0}")]
    Filter(String),
}

impl From<figment::Error> for TelemetryError {
    fn from(value: figment::Error) -> Self {
        TelemetryError::Config(Box::new(value))
    }
}
