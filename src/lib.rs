//! # Node Telemetry Core Library
//!
//! This crate reduces the flat text logs written by battery-powered remote sensor nodes to
//! decimated, unit-corrected tables, and turns oscilloscope current traces into charge
//! budgets. The `node-telemetry` binary (`main.rs`) is a thin CLI over these modules.
//!
//! ## Crate Structure
//!
//! - **`record`**: Parses raw log lines into typed `Observation`s. Each firmware generation is
//!   a `Dialect` with its own positional field layout. `record::meter` handles the METER soil
//!   logger CSV with its 12-hour wall-clock timestamps.
//! - **`decimate`**: Time-bucketed selection of at most one observation per interval, as a
//!   lazy iterator adapter with explicit per-stream state.
//! - **`units`**: The single place where fixed-point fields are decoded to physical units.
//! - **`data`**: Trace loading, Butterworth low-pass filtering, charge integration, and the
//!   CSV and JSON-lines storage writers.
//! - **`pipeline`**: Wires the above into the node-log, logger, charge and sampling runs.
//! - **`config`**: Layered configuration via `figment` (defaults, TOML, environment).
//! - **`logging`**: `tracing-subscriber` setup writing to stderr.
//! - **`error`**: The `TelemetryError` enum shared across the crate.
//! - **`validation`**: Small helpers used by configuration validation.

pub mod config;
pub mod data;
pub mod decimate;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod units;
pub mod validation;

pub use error::{Result, TelemetryError};
