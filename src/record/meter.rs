//! METER soil logger exports.
//!
//! The logger writes a few header lines followed by comma-separated rows such as
//!
//! ```text
//! 8/31/2009 11:40 PM,0.136,3.4,0.00,0.097,5.2,0.01,0.137,2.6,0.01,0.091,6.9,0.00,0.036,5.3,0.00
//! ```
//!
//! The logger clock was set wrongly on deployment, so every row is corrected by a fixed
//! offset and both the recorded and corrected times are kept.

use super::ParseFailure;
use crate::units::TIME_FORMAT;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;

/// One logger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterRecord {
    /// Date text exactly as recorded.
    pub recorded_text: String,
    /// The recorded wall-clock time.
    pub recorded: NaiveDateTime,
    /// The recorded time plus the clock offset.
    pub corrected: NaiveDateTime,
    /// Sensor cells in file order (VWC, temperature, bulk EC per port), trimmed but
    /// otherwise as recorded. Unused ports leave them empty.
    pub readings: Vec<String>,
}

impl MeterRecord {
    /// Output fields: original time, corrected time, then readings.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(self.readings.len() + 2);
        fields.push(self.recorded_text.clone());
        fields.push(self.corrected.format(TIME_FORMAT).to_string());
        fields.extend(self.readings.iter().cloned());
        fields
    }
}

/// Parses `M/D/YYYY h:mm AM|PM` into a naive local time.
///
/// 12 AM is hour 0 and 12 PM is hour 12.
pub fn parse_wall_clock(text: &str) -> Result<NaiveDateTime, ParseFailure> {
    let invalid = || ParseFailure::InvalidDate {
        text: text.to_string(),
    };
    let parts: Vec<&str> = text
        .split(|c: char| c == '/' || c == ':' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect();
    let [month, day, year, hour, minute, meridiem] = parts.as_slice() else {
        return Err(invalid());
    };

    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&hour) {
        return Err(invalid());
    }
    let hour = match meridiem.to_ascii_uppercase().as_str() {
        "AM" => hour % 12,
        "PM" => hour % 12 + 12,
        _ => return Err(invalid()),
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(invalid)
}

/// Parses METER data rows and applies the clock correction.
#[derive(Debug, Clone, Copy)]
pub struct MeterParser {
    offset: TimeDelta,
}

impl MeterParser {
    /// A parser that shifts every timestamp by `offset_seconds`.
    pub fn new(offset_seconds: i64) -> crate::Result<Self> {
        let offset = TimeDelta::try_seconds(offset_seconds).ok_or_else(|| {
            crate::TelemetryError::Configuration(format!(
                "clock offset {offset_seconds}s is out of range"
            ))
        })?;
        Ok(Self { offset })
    }

    /// Parses one data row.
    pub fn parse(&self, line: &str) -> Result<MeterRecord, ParseFailure> {
        let mut fields = line.trim().split(',');
        let recorded_text = fields.next().unwrap_or_default().trim();
        let recorded = parse_wall_clock(recorded_text)?;
        let corrected = recorded
            .checked_add_signed(self.offset)
            .ok_or_else(|| ParseFailure::InvalidDate {
                text: recorded_text.to_string(),
            })?;

        let readings = fields.map(|token| token.trim().to_string()).collect();

        Ok(MeterRecord {
            recorded_text: recorded_text.to_string(),
            recorded,
            corrected,
            readings,
        })
    }
}
