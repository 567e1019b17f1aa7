//! Charge integration over a filtered current trace.
//!
//! The trace holds the voltage across a sense resistor. Samples strictly above the zero
//! threshold are "active". The integrator averages the active samples, converts the average to a
//! current through the resistance and unit scale, and multiplies by the active time to get
//! the charge drawn. With the default scale of 1000 the result is in mA·s.

use crate::data::trace::FilteredTrace;
use crate::error::{Result, TelemetryError};
use serde::Serialize;

/// Summary of one integration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntegrationResult {
    /// Elapsed time of the first active sample.
    pub start_time: f64,
    /// Elapsed time of the last active sample.
    pub end_time: f64,
    /// `qualifying_samples * delta_t`.
    pub total_active_time: f64,
    /// Charge over the active time, in current-unit·seconds.
    pub total_charge: f64,
    /// Number of active samples.
    pub qualifying_samples: usize,
    /// Mean amplitude of the active samples, in trace units.
    pub mean_amplitude: f64,
    /// Mean current over the active samples, in scaled units.
    pub mean_current: f64,
}

impl IntegrationResult {
    /// Column names of the four-field summary.
    pub const SUMMARY_COLUMNS: [&'static str; 4] = ["start_time", "end_time", "total_time", "charge"];

    /// The four-field summary `start_time, end_time, total_time, charge`.
    #[must_use]
    pub fn summary(&self) -> [f64; 4] {
        [
            self.start_time,
            self.end_time,
            self.total_active_time,
            self.total_charge,
        ]
    }
}

/// Integrates active samples of a filtered trace into time and charge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeIntegrator {
    zero_threshold: f64,
    resistance_ohms: f64,
    unit_scale: f64,
}

impl ChargeIntegrator {
    /// Creates an integrator. `unit_scale` converts amps to the output unit (1000 for mA).
    pub fn new(zero_threshold: f64, resistance_ohms: f64, unit_scale: f64) -> Result<Self> {
        if !(resistance_ohms.is_finite() && resistance_ohms > 0.0) {
            return Err(TelemetryError::Configuration(format!(
                "resistance {resistance_ohms} must be positive and finite"
            )));
        }
        if !unit_scale.is_finite() {
            return Err(TelemetryError::Configuration(format!(
                "unit scale {unit_scale} must be finite"
            )));
        }
        Ok(Self {
            zero_threshold,
            resistance_ohms,
            unit_scale,
        })
    }

    /// Single forward pass over `trace`.
    ///
    /// Returns [`TelemetryError::EmptyResult`] when no sample exceeds the threshold.
    pub fn integrate(&self, trace: &FilteredTrace) -> Result<IntegrationResult> {
        let delta_t = trace.delta_t();
        let mut start: Option<usize> = None;
        let mut end = 0usize;
        let mut count = 0usize;
        let mut sum = 0.0;

        for (index, &value) in trace.samples().iter().enumerate() {
            if value > self.zero_threshold {
                start.get_or_insert(index);
                end = index;
                count += 1;
                sum += value;
            }
        }

        let Some(start) = start else {
            return Err(TelemetryError::EmptyResult {
                samples: trace.len(),
                threshold: self.zero_threshold,
            });
        };

        let total_active_time = count as f64 * delta_t;
        let mean_amplitude = sum / count as f64;
        let mean_current = mean_amplitude / self.resistance_ohms * self.unit_scale;
        Ok(IntegrationResult {
            start_time: start as f64 * delta_t,
            end_time: end as f64 * delta_t,
            total_active_time,
            total_charge: mean_current * total_active_time,
            qualifying_samples: count,
            mean_amplitude,
            mean_current,
        })
    }
}
