//! Dense oscilloscope traces.
//!
//! Scope exports are CSV files with a block of vendor metadata rows followed by
//! `time,value` rows sampled at a fixed interval. The vendor time column is kept as written,
//! for display only: elapsed time is always `index * delta_t`.

use crate::error::{Result, TelemetryError};
use crate::record::ParseFailure;
use csv::ReaderBuilder;
use std::io::{BufRead, BufReader, Read};

/// A uniformly sampled signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    samples: Vec<f64>,
    vendor_times: Vec<String>,
    delta_t: f64,
    skipped_rows: usize,
}

impl Trace {
    /// Builds a trace from samples. Vendor times default to `index * delta_t`.
    #[must_use]
    pub fn from_samples(samples: Vec<f64>, delta_t: f64) -> Self {
        let vendor_times = (0..samples.len())
            .map(|i| (i as f64 * delta_t).to_string())
            .collect();
        Self {
            samples,
            vendor_times,
            delta_t,
            skipped_rows: 0,
        }
    }

    /// Reads a scope CSV export, skipping `skip_rows` metadata lines and adding
    /// `voltage_offset` to every sample.
    pub fn from_reader<R: Read>(
        reader: R,
        skip_rows: usize,
        delta_t: f64,
        voltage_offset: f64,
    ) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        let mut discard = String::new();
        for _ in 0..skip_rows {
            discard.clear();
            if reader.read_line(&mut discard)? == 0 {
                break;
            }
        }

        let mut csv = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut samples = Vec::new();
        let mut vendor_times = Vec::new();
        for (row, record) in csv.records().enumerate() {
            let record = record?;
            let line = skip_rows + row + 1;
            column(&record, 0, "time", line)?;
            let value = column(&record, 1, "value", line)?;
            vendor_times.push(record.get(0).unwrap_or_default().to_string());
            samples.push(value + voltage_offset);
        }

        tracing::debug!(samples = samples.len(), skip_rows, "Loaded trace");
        Ok(Self {
            samples,
            vendor_times,
            delta_t,
            skipped_rows: skip_rows,
        })
    }

    /// Sample values.
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Vendor time column as written, informational only.
    #[must_use]
    pub fn vendor_times(&self) -> &[String] {
        &self.vendor_times
    }

    /// Seconds between samples.
    #[must_use]
    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the trace holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Elapsed time of sample `index`.
    #[must_use]
    pub fn elapsed(&self, index: usize) -> f64 {
        index as f64 * self.delta_t
    }

    /// Thins the trace for plotting: keeps rows whose line number in the original file
    /// (metadata rows included, counted from 0) is a multiple of `every`, and renders
    /// values at or below `zero` as 0.
    #[must_use]
    pub fn thin(&self, every: usize, zero: f64) -> Vec<(&str, f64)> {
        let every = every.max(1);
        self.vendor_times
            .iter()
            .zip(&self.samples)
            .enumerate()
            .filter(|(i, _)| (self.skipped_rows + i) % every == 0)
            .map(|(_, (time, &value))| (time.as_str(), if value <= zero { 0.0 } else { value }))
            .collect()
    }
}

fn column(record: &csv::StringRecord, index: usize, name: &'static str, line: usize) -> Result<f64> {
    let token = record.get(index).unwrap_or_default();
    token.parse().map_err(|_| TelemetryError::MalformedRecord {
        line,
        source: ParseFailure::InvalidField {
            field: name,
            token: token.to_string(),
        },
    })
}

/// A trace after low-pass filtering and noise-floor clamping. Same length and time base
/// as its source.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredTrace {
    samples: Vec<f64>,
    delta_t: f64,
}

impl FilteredTrace {
    /// Wraps already filtered samples.
    #[must_use]
    pub fn new(samples: Vec<f64>, delta_t: f64) -> Self {
        Self { samples, delta_t }
    }

    /// Filtered sample values.
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Seconds between samples.
    #[must_use]
    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the trace holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "Record Length,Analog:4\n\
                          Sample Interval,1.000000E-06\n\
                          Vertical Units,V\n\
                          Second,Value\n\
                          -2.000000E-06,0.001\n\
                          -0.000001,0.002\n\
                          0.000000,0.050\n\
                          0.000001,0.020\n";

    #[test]
    fn skips_metadata_and_reads_samples() {
        let trace = Trace::from_reader(EXPORT.as_bytes(), 4, 1e-6, 0.0).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.samples(), &[0.001, 0.002, 0.050, 0.020]);
        assert_eq!(trace.vendor_times()[0], "-2.000000E-06");
        // Elapsed time comes from the index, never from the vendor column.
        assert_eq!(trace.elapsed(2), 2e-6);
    }

    #[test]
    fn applies_voltage_offset() {
        let trace = Trace::from_reader(EXPORT.as_bytes(), 4, 1e-6, 1.0).unwrap();
        assert!((trace.samples()[0] - 1.001).abs() < 1e-12);
    }

    #[test]
    fn bad_data_row_is_fatal_with_line_number() {
        let err = Trace::from_reader(EXPORT.as_bytes(), 3, 1e-6, 0.0).unwrap_err();
        match err {
            TelemetryError::MalformedRecord { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn short_file_yields_empty_trace() {
        let trace = Trace::from_reader("a\nb\n".as_bytes(), 12, 1e-6, 0.0).unwrap();
        assert!(trace.is_empty());
    }

    #[test]
    fn thin_counts_metadata_rows_and_clamps() {
        let trace = Trace::from_reader(EXPORT.as_bytes(), 4, 1e-6, 0.0).unwrap();
        // Data rows sit on file lines 4..=7; every 2nd line keeps lines 4 and 6.
        assert_eq!(
            trace.thin(2, 0.01),
            vec![("-2.000000E-06", 0.0), ("0.000000", 0.050)]
        );
        assert_eq!(trace.thin(1, 0.0).len(), 4);
    }
}
