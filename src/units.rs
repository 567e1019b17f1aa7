//! Fixed-point decoding for node telemetry fields.
//!
//! Node firmware reports battery voltage, temperature and humidity as integers carrying two
//! implied decimal digits (`331` means 3.31 V). [`Centi`] is the only place that scale factor
//! lives; everything else works with the typed value or the decoded `f64`.
//!
//! [`normalize`] turns a parsed [`Observation`] into a [`Reading`] in physical units, ready
//! for output.

use crate::record::Observation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of raw counts per physical unit.
pub const FIXED_POINT_SCALE: i64 = 100;

/// A fixed-point value with two implied decimal digits, exactly as transmitted by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Centi(i64);

impl Centi {
    /// Wraps a raw count.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Decodes to physical units.
    #[must_use]
    pub fn decode(self) -> f64 {
        self.0 as f64 / FIXED_POINT_SCALE as f64
    }

    /// Encodes a physical value, rounding to the nearest count.
    #[must_use]
    pub fn encode(value: f64) -> Self {
        Self((value * FIXED_POINT_SCALE as f64).round() as i64)
    }
}

impl FromStr for Centi {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for Centi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_decimal(self.decode()))
    }
}

/// Renders a physical value the way the reduced tables expect: shortest round-trip decimal,
/// always with a fractional part (`3.31`, `1.1`, `4.0`).
#[must_use]
pub fn format_decimal(value: f64) -> String {
    format!("{value:?}")
}

/// Render format for UTC message times.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An observation in physical units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Originating node.
    pub node_id: String,
    /// Per-node message counter.
    pub sequence_number: u64,
    /// Message time as `YYYY-MM-DD HH:MM:SS` UTC.
    pub time_utc: String,
    /// Message time as epoch seconds.
    pub epoch_seconds: i64,
    /// Transmission time in milliseconds.
    pub tx_duration_ms: u32,
    /// Battery voltage in volts.
    pub battery_volts: f64,
    /// Temperature in °C.
    pub temperature_c: f64,
    /// Relative humidity in %.
    pub humidity_pct: f64,
    /// Status flags as `0x..`.
    pub status: String,
    /// Signal strength in dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

/// Converts fixed-point fields to physical units. Pure; no state.
#[must_use]
pub fn normalize(observation: &Observation) -> Reading {
    Reading {
        node_id: observation.node_id.clone(),
        sequence_number: observation.sequence_number,
        time_utc: observation.timestamp.format(TIME_FORMAT).to_string(),
        epoch_seconds: observation.epoch_seconds(),
        tx_duration_ms: observation.tx_duration_ms,
        battery_volts: observation.battery_volts.decode(),
        temperature_c: observation.temperature_c.decode(),
        humidity_pct: observation.humidity_pct.decode(),
        status: observation.status.to_string(),
        rssi: observation.rssi,
    }
}

impl Reading {
    /// Output fields in column order; RSSI only when `with_rssi`.
    #[must_use]
    pub fn fields(&self, with_rssi: bool) -> Vec<String> {
        let mut fields = vec![
            self.node_id.clone(),
            self.sequence_number.to_string(),
            self.time_utc.clone(),
            self.epoch_seconds.to_string(),
            self.tx_duration_ms.to_string(),
            format_decimal(self.battery_volts),
            format_decimal(self.temperature_c),
            format_decimal(self.humidity_pct),
            self.status.clone(),
        ];
        if with_rssi {
            fields.push(self.rssi.map(|r| r.to_string()).unwrap_or_default());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_two_implied_digits() {
        assert_eq!(Centi::from_raw(331).decode(), 3.31);
        assert_eq!(Centi::from_raw(110).decode(), 1.1);
        assert_eq!(Centi::from_raw(9913).decode(), 99.13);
        assert_eq!(Centi::from_raw(-250).decode(), -2.5);
    }

    #[test]
    fn encode_inverts_decode() {
        for raw in [-10_000, -100, 0, 100, 331, 1904, 3480, 9913, 123_400] {
            let value = Centi::from_raw(raw);
            assert_eq!(Centi::encode(value.decode()), value);
        }
    }

    #[test]
    fn display_keeps_fractional_part() {
        assert_eq!(Centi::from_raw(400).to_string(), "4.0");
        assert_eq!(Centi::from_raw(331).to_string(), "3.31");
        assert_eq!(format_decimal(0.035), "0.035");
    }

    #[test]
    fn normalize_produces_physical_units() {
        use crate::record::{Dialect, RecordParser};

        let obs = RecordParser::new(Dialect::LeafSd)
            .parse("2, 1, 1612714606, 425, 0, 1904, 3480, 0x00")
            .unwrap();
        let reading = normalize(&obs);
        assert_eq!(reading.time_utc, "2021-02-07 16:16:46");
        assert_eq!(reading.epoch_seconds, 1_612_714_606);
        assert_eq!(reading.battery_volts, 4.25);
        assert_eq!(reading.temperature_c, 19.04);
        assert_eq!(reading.humidity_pct, 34.8);
        assert_eq!(
            reading.fields(false),
            vec!["2", "1", "2021-02-07 16:16:46", "1612714606", "0", "4.25", "19.04", "34.8", "0x00"]
        );
        assert_eq!(reading.fields(true).last().map(String::as_str), Some(""));
    }

    #[test]
    fn parses_signed_counts() {
        assert_eq!("-42".parse::<Centi>().unwrap(), Centi::from_raw(-42));
        assert!("4.2".parse::<Centi>().is_err());
    }
}
