//! Record parsing for node telemetry logs.
//!
//! Node logs are flat, whitespace-separated text. Several firmware generations wrote the same
//! fields in different positions, and older logs carry no row-type tag at all: header lines,
//! blank lines and out-of-band chatter such as `time request` lines are only told apart from
//! data rows by how many tokens they split into.
//!
//! Each [`Dialect`] owns a fixed [`FieldLayout`] that maps token positions to fields. A
//! [`RecordParser`] applies one layout to one line and returns either an [`Observation`] or a
//! [`ParseFailure`]. It never decides what to do with a failure; that policy belongs to the
//! driver in [`crate::pipeline`].
//!
//! The METER soil logger writes a different, comma-separated format with local wall-clock
//! timestamps. It is handled by [`meter`].

pub mod meter;

use crate::units::Centi;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Earliest accepted epoch second (2000-01-01T00:00:00Z).
pub const MIN_PLAUSIBLE_EPOCH: i64 = 946_684_800;

/// First rejected epoch second (2100-01-01T00:00:00Z).
pub const MAX_PLAUSIBLE_EPOCH: i64 = 4_102_444_800;

/// Why a single line did not produce an observation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// The line has fewer tokens than the dialect's data rows. Headers, blank lines and
    /// `time request` lines all end up here.
    #[error("found {found} tokens, need at least {required}")]
    TooFewTokens {
        /// Tokens on the line.
        found: usize,
        /// Minimum for the dialect.
        required: usize,
    },

    /// A positional field did not parse as the expected type.
    #[error("field '{field}' has invalid value '{token}'")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending token.
        token: String,
    },

    /// The timestamp parsed but lies outside the plausible calendar range.
    #[error("timestamp {value} is outside the plausible range")]
    ImplausibleTimestamp {
        /// Raw timestamp token value.
        value: i64,
    },

    /// A wall-clock date could not be parsed (METER logger only).
    #[error("unparseable date '{text}'")]
    InvalidDate {
        /// The offending date text.
        text: String,
    },
}

impl ParseFailure {
    /// Whether a retry with a different timestamp unit could succeed.
    #[must_use]
    pub fn is_implausible_timestamp(&self) -> bool {
        matches!(self, ParseFailure::ImplausibleTimestamp { .. })
    }

    /// Lines that are routinely present in logs and are not data at all.
    #[must_use]
    pub fn is_non_data(&self) -> bool {
        matches!(self, ParseFailure::TooFewTokens { .. })
    }
}

/// Node health flags as an opaque bit-field. Decoding the bits into text is left to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusFlags(pub u16);

impl FromStr for StatusFlags {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u16::from_str_radix(digits, 16).map(StatusFlags)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl Serialize for StatusFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One telemetry sample from one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Originating node.
    pub node_id: String,
    /// Per-node message counter.
    pub sequence_number: u64,
    /// Message time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Radio transmission time of the previous message.
    pub tx_duration_ms: u32,
    /// Battery voltage, fixed-point.
    pub battery_volts: Centi,
    /// Temperature in °C, fixed-point.
    pub temperature_c: Centi,
    /// Relative humidity in %, fixed-point.
    pub humidity_pct: Centi,
    /// Node health flags.
    pub status: StatusFlags,
    /// Received signal strength in dBm; only newer logs carry it.
    pub rssi: Option<i32>,
}

impl Observation {
    /// Timestamp as epoch seconds.
    #[must_use]
    pub fn epoch_seconds(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Token positions of each field for one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Lines with fewer tokens are not data rows.
    pub min_tokens: usize,
    /// Node identifier.
    pub node: usize,
    /// Message sequence number.
    pub sequence: usize,
    /// Epoch timestamp.
    pub timestamp: usize,
    /// Transmission duration.
    pub tx_duration: usize,
    /// Battery voltage.
    pub battery: usize,
    /// Temperature.
    pub temperature: usize,
    /// Humidity.
    pub humidity: usize,
    /// Status flags.
    pub status: usize,
    /// Signal strength, when the dialect has it.
    pub rssi: Option<usize>,
}

// "Hello node 2 message 270209 msg time 1604995280 tx time 403 ms battery 331 v temp 110 C
//  humidity 9913 % status 0x00"
const HELLO_V1: FieldLayout = FieldLayout {
    min_tokens: 23,
    node: 2,
    sequence: 4,
    timestamp: 7,
    tx_duration: 10,
    battery: 13,
    temperature: 16,
    humidity: 19,
    status: 22,
    rssi: None,
};

// "Hello node 2 message 1234 time 1627228800 battery 331 v tx time 403 ms temp 2350 C
//  humidity 4512 % status 0x00 rssi -87 dBm snr 9 dB freq 915 MHz"
const HELLO_V2: FieldLayout = FieldLayout {
    min_tokens: 31,
    node: 2,
    sequence: 4,
    timestamp: 6,
    tx_duration: 12,
    battery: 8,
    temperature: 15,
    humidity: 18,
    status: 21,
    rssi: Some(23),
};

// "2, 1, 1612714606, 425, 0, 1904, 3480, 0x00"
const LEAF_SD: FieldLayout = FieldLayout {
    min_tokens: 8,
    node: 0,
    sequence: 1,
    timestamp: 2,
    tx_duration: 4,
    battery: 3,
    temperature: 5,
    humidity: 6,
    status: 7,
    rssi: None,
};

/// Log layout generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// Early main-node log of `Hello node ...` lines.
    HelloV1,
    /// Current main-node log; adds RSSI and moves the battery field forward.
    HelloV2,
    /// Leaf node SD card rows, also used by the cleaned yard-deployment CSV files.
    LeafSd,
}

impl Dialect {
    /// The fixed token layout for this dialect.
    #[must_use]
    pub const fn layout(self) -> &'static FieldLayout {
        match self {
            Dialect::HelloV1 => &HELLO_V1,
            Dialect::HelloV2 => &HELLO_V2,
            Dialect::LeafSd => &LEAF_SD,
        }
    }

    /// Whether observations in this dialect carry RSSI.
    #[must_use]
    pub const fn has_rssi(self) -> bool {
        self.layout().rssi.is_some()
    }
}

/// Unit of the numeric timestamp token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    /// Epoch seconds, what well-configured firmware writes.
    #[default]
    Seconds,
    /// Epoch milliseconds, seen on nodes whose RTC library was misconfigured.
    Milliseconds,
}

/// Converts a raw epoch token to a UTC time, rejecting values outside
/// [`MIN_PLAUSIBLE_EPOCH`, `MAX_PLAUSIBLE_EPOCH`).
pub fn decode_epoch(raw: i64, unit: TimestampUnit) -> Result<DateTime<Utc>, ParseFailure> {
    let seconds = match unit {
        TimestampUnit::Seconds => raw,
        TimestampUnit::Milliseconds => raw.div_euclid(1000),
    };
    if !(MIN_PLAUSIBLE_EPOCH..MAX_PLAUSIBLE_EPOCH).contains(&seconds) {
        return Err(ParseFailure::ImplausibleTimestamp { value: raw });
    }
    DateTime::from_timestamp(seconds, 0).ok_or(ParseFailure::ImplausibleTimestamp { value: raw })
}

/// Splits a line into tokens. Commas are cosmetic and act as whitespace, so
/// `"battery 331 v,"` and `"2, 1, 1612714606"` both reduce to positional tokens.
#[must_use]
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect()
}

fn field<T: FromStr>(tokens: &[&str], index: usize, name: &'static str) -> Result<T, ParseFailure> {
    let token = tokens.get(index).copied().unwrap_or_default();
    token.parse().map_err(|_| ParseFailure::InvalidField {
        field: name,
        token: token.to_string(),
    })
}

/// Parses lines of one dialect into observations.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    dialect: Dialect,
    unit: TimestampUnit,
}

impl RecordParser {
    /// A parser for `dialect` that reads timestamps as epoch seconds.
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            unit: TimestampUnit::Seconds,
        }
    }

    /// Sets the unit of the timestamp token.
    #[must_use]
    pub fn with_timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.unit = unit;
        self
    }

    /// The dialect this parser reads.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parses one raw line.
    pub fn parse(&self, line: &str) -> Result<Observation, ParseFailure> {
        let layout = self.dialect.layout();
        let tokens = tokenize(line);
        if tokens.len() < layout.min_tokens {
            return Err(ParseFailure::TooFewTokens {
                found: tokens.len(),
                required: layout.min_tokens,
            });
        }

        let raw_time: i64 = field(&tokens, layout.timestamp, "timestamp")?;
        let timestamp = decode_epoch(raw_time, self.unit)?;

        let rssi = layout
            .rssi
            .map(|index| field(&tokens, index, "rssi"))
            .transpose()?;

        Ok(Observation {
            node_id: field(&tokens, layout.node, "node")?,
            sequence_number: field(&tokens, layout.sequence, "sequence")?,
            timestamp,
            tx_duration_ms: field(&tokens, layout.tx_duration, "tx_duration")?,
            battery_volts: field(&tokens, layout.battery, "battery")?,
            temperature_c: field(&tokens, layout.temperature, "temperature")?,
            humidity_pct: field(&tokens, layout.humidity, "humidity")?,
            status: field(&tokens, layout.status, "status")?,
            rssi,
        })
    }
}
