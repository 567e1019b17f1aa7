//! Butterworth low-pass filtering of current traces.
//!
//! The filter is a cascade of second-order sections designed with the `biquad` crate. An
//! order-N Butterworth response is built from N/2 biquads with the Butterworth pole Q values,
//! plus one first-order section when N is odd. Running sections in cascade rather than as one
//! high-order polynomial keeps the filter stable at the orders and cutoffs scope data needs.
//!
//! After filtering, every sample below the noise floor is set to exactly `0.0`.
use crate::data::trace::{FilteredTrace, Trace};
use crate::error::{Result, TelemetryError};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Highest supported filter order.
pub const MAX_ORDER: usize = 12;

/// How the cascade is run over a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    /// One forward pass. Output at `i` depends only on inputs up to `i`.
    #[default]
    Causal,
    /// Forward then backward pass: no phase delay, squared magnitude response.
    ZeroPhase,
}

/// Configuration for the `LowpassFilter`.
///
/// This struct is typically built from the `[trace]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowpassConfig {
    /// The cutoff frequency in Hz.
    pub cutoff_hz: f64,
    /// The sample rate of the trace in Hz.
    pub sample_rate_hz: f64,
    /// Butterworth order, 1..=`MAX_ORDER`.
    pub order: usize,
    /// Causal or zero-phase.
    pub mode: FilterMode,
    /// Filtered values below this are clamped to zero.
    pub noise_floor: f64,
}

/// A Butterworth low-pass filter with a hard noise floor.
///
/// # Example Configuration (`.toml`)
///
/// ```toml
/// [trace]
/// cutoff_hz = 1000.0
/// order = 4
/// mode = "causal"
/// zero_threshold = 0.00015
/// ```
#[derive(Debug, Clone)]
pub struct LowpassFilter {
    sections: Vec<Coefficients<f64>>,
    mode: FilterMode,
    noise_floor: f64,
}

impl LowpassFilter {
    /// Designs the filter, failing if the cutoff is not below Nyquist or the order is out
    /// of range.
    pub fn new(config: &LowpassConfig) -> Result<Self> {
        let sections = Self::design_filter(config)?;
        Ok(Self {
            sections,
            mode: config.mode,
            noise_floor: config.noise_floor,
        })
    }

    /// Number of cascaded sections.
    #[must_use]
    pub fn sections(&self) -> usize {
        self.sections.len()
    }

    fn design_filter(config: &LowpassConfig) -> Result<Vec<Coefficients<f64>>> {
        let order = config.order;
        if order == 0 || order > MAX_ORDER {
            return Err(TelemetryError::Filter(format!(
                "order {order} is outside 1..={MAX_ORDER}"
            )));
        }
        if !(config.sample_rate_hz.is_finite() && config.sample_rate_hz > 0.0) {
            return Err(TelemetryError::Filter(format!(
                "sample rate {} Hz must be positive and finite",
                config.sample_rate_hz
            )));
        }
        let nyquist = config.sample_rate_hz / 2.0;
        if !(config.cutoff_hz > 0.0 && config.cutoff_hz < nyquist) {
            return Err(TelemetryError::Filter(format!(
                "cutoff {} Hz must be within (0, {nyquist}) Hz",
                config.cutoff_hz
            )));
        }

        let fs = config.sample_rate_hz.hz();
        let f0 = config.cutoff_hz.hz();
        let mut sections = Vec::with_capacity(order.div_ceil(2));
        for q in butterworth_q(order) {
            let coeffs = Coefficients::<f64>::from_params(biquad::Type::LowPass, fs, f0, q)
                .map_err(|e| {
                    TelemetryError::Filter(format!("Failed to create low-pass section: {e:?}"))
                })?;
            sections.push(coeffs);
        }
        if order % 2 == 1 {
            sections.push(first_order_lowpass(config.cutoff_hz, config.sample_rate_hz));
        }
        Ok(sections)
    }

    /// Filters `trace` and clamps sub-floor values to zero.
    #[must_use]
    pub fn apply(&self, trace: &Trace) -> FilteredTrace {
        let mut samples = self.run_cascade(trace.samples());
        if self.mode == FilterMode::ZeroPhase {
            samples.reverse();
            samples = self.run_cascade(&samples);
            samples.reverse();
        }
        for value in &mut samples {
            if *value < self.noise_floor {
                *value = 0.0;
            }
        }
        FilteredTrace::new(samples, trace.delta_t())
    }

    fn run_cascade(&self, input: &[f64]) -> Vec<f64> {
        let mut stages: Vec<DirectForm2Transposed<f64>> = self
            .sections
            .iter()
            .map(|coeffs| DirectForm2Transposed::<f64>::new(*coeffs))
            .collect();
        input
            .iter()
            .map(|&x| stages.iter_mut().fold(x, |acc, stage| stage.run(acc)))
            .collect()
    }
}

/// Q of each biquad in an order-`order` Butterworth cascade.
fn butterworth_q(order: usize) -> Vec<f64> {
    let n = order as f64;
    (0..order / 2)
        .map(|k| {
            let theta = if order % 2 == 0 {
                (2 * k + 1) as f64 * PI / (2.0 * n)
            } else {
                (k + 1) as f64 * PI / n
            };
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

/// Bilinear-transform single-pole low-pass with pre-warped cutoff.
fn first_order_lowpass(cutoff_hz: f64, sample_rate_hz: f64) -> Coefficients<f64> {
    let k = (PI * cutoff_hz / sample_rate_hz).tan();
    let norm = 1.0 / (1.0 + k);
    Coefficients {
        a1: (k - 1.0) * norm,
        a2: 0.0,
        b0: k * norm,
        b1: k * norm,
        b2: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(order: usize, mode: FilterMode) -> LowpassConfig {
        LowpassConfig {
            cutoff_hz: 1000.0,
            sample_rate_hz: 100_000.0,
            order,
            mode,
            noise_floor: 0.0,
        }
    }

    fn step(len: usize) -> Trace {
        Trace::from_samples(vec![1.0; len], 1e-5)
    }

    #[test]
    fn test_lowpass_filter_creation() {
        assert!(LowpassFilter::new(&config(4, FilterMode::Causal)).is_ok());
    }

    #[test]
    fn test_section_count_follows_order() {
        for (order, sections) in [(1, 1), (2, 1), (3, 2), (4, 2), (5, 3), (8, 4)] {
            let filter = LowpassFilter::new(&config(order, FilterMode::Causal)).unwrap();
            assert_eq!(filter.sections(), sections, "order {order}");
        }
    }

    #[test]
    fn test_butterworth_q_values() {
        let q2 = butterworth_q(2);
        assert!((q2[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        let q4 = butterworth_q(4);
        assert!((q4[0] - 0.541_196_1).abs() < 1e-6);
        assert!((q4[1] - 1.306_563_0).abs() < 1e-6);
        let q3 = butterworth_q(3);
        assert!((q3[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_filter_params() {
        // f0 > fs / 2
        let mut bad = config(4, FilterMode::Causal);
        bad.cutoff_hz = 60_000.0;
        assert!(LowpassFilter::new(&bad).is_err());

        assert!(LowpassFilter::new(&config(0, FilterMode::Causal)).is_err());
        assert!(LowpassFilter::new(&config(MAX_ORDER + 1, FilterMode::Causal)).is_err());
    }

    #[test]
    fn test_preserves_length_and_time_base() {
        let trace = step(257);
        let filter = LowpassFilter::new(&config(4, FilterMode::Causal)).unwrap();
        let filtered = filter.apply(&trace);
        assert_eq!(filtered.len(), trace.len());
        assert_eq!(filtered.delta_t(), trace.delta_t());
    }

    #[test]
    fn test_unity_dc_gain() {
        for order in [1, 2, 3, 4, 6] {
            let filter = LowpassFilter::new(&config(order, FilterMode::Causal)).unwrap();
            let filtered = filter.apply(&step(5000));
            let last = *filtered.samples().last().unwrap();
            assert!((last - 1.0).abs() < 1e-6, "order {order}: {last}");
        }
    }

    #[test]
    fn test_causal_output_ignores_future_samples() {
        let filter = LowpassFilter::new(&config(4, FilterMode::Causal)).unwrap();
        let mut a = vec![0.0; 100];
        let mut b = vec![0.0; 100];
        a[10] = 1.0;
        b[10] = 1.0;
        b[60] = 5.0;
        let fa = filter.apply(&Trace::from_samples(a, 1e-5));
        let fb = filter.apply(&Trace::from_samples(b, 1e-5));
        assert_eq!(fa.samples()[..60], fb.samples()[..60]);
    }

    #[test]
    fn test_attenuates_high_frequency() {
        let fs = 100_000.0;
        let tone: Vec<f64> = (0..10_000)
            .map(|i| (2.0 * PI * 20_000.0 * i as f64 / fs).sin())
            .collect();
        let filter = LowpassFilter::new(&LowpassConfig {
            noise_floor: f64::NEG_INFINITY,
            ..config(4, FilterMode::Causal)
        })
        .unwrap();
        let filtered = filter.apply(&Trace::from_samples(tone, 1.0 / fs));
        let peak = filtered.samples()[5000..]
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        assert!(peak < 1e-3, "peak {peak}");
    }

    #[test]
    fn test_noise_floor_clamps_to_exact_zero() {
        let filter = LowpassFilter::new(&LowpassConfig {
            noise_floor: 0.5,
            ..config(2, FilterMode::Causal)
        })
        .unwrap();
        let filtered = filter.apply(&step(2000));
        for &value in filtered.samples() {
            assert!(value == 0.0 || value >= 0.5, "residual {value}");
        }
        assert_eq!(filtered.samples()[0], 0.0);
        assert!(*filtered.samples().last().unwrap() > 0.99);
    }

    #[test]
    fn test_zero_phase_has_no_lag() {
        let mut samples = vec![0.0; 4000];
        samples[2000] = 1.0;
        let trace = Trace::from_samples(samples, 1e-5);
        let floor = f64::NEG_INFINITY;
        let causal = LowpassFilter::new(&LowpassConfig {
            noise_floor: floor,
            ..config(4, FilterMode::Causal)
        })
        .unwrap()
        .apply(&trace);
        let zero_phase = LowpassFilter::new(&LowpassConfig {
            noise_floor: floor,
            ..config(4, FilterMode::ZeroPhase)
        })
        .unwrap()
        .apply(&trace);

        let argmax = |s: &[f64]| {
            s.iter()
                .enumerate()
                .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        };
        assert!(argmax(causal.samples()) > 2000);
        assert!(argmax(zero_phase.samples()).abs_diff(2000) <= 1);
    }
}
