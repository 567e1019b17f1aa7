//! Writers for reduced tables.
use crate::data::integrator::IntegrationResult;
use crate::error::{Result, TelemetryError};
use crate::record::meter::MeterRecord;
use crate::units::Reading;
use serde::Serialize;
use std::io::{self, Write};

/// A row that can be written as CSV fields or as a JSON object.
pub trait TabularRow: Serialize {
    /// Fields in column order.
    fn fields(&self) -> Vec<String>;
}

/// A node reading together with whether its table has an RSSI column.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ReadingRow<'a> {
    #[serde(skip)]
    with_rssi: bool,
    reading: &'a Reading,
}

impl<'a> ReadingRow<'a> {
    /// Wraps a reading for output.
    #[must_use]
    pub fn new(reading: &'a Reading, with_rssi: bool) -> Self {
        Self { with_rssi, reading }
    }
}

impl TabularRow for ReadingRow<'_> {
    fn fields(&self) -> Vec<String> {
        self.reading.fields(self.with_rssi)
    }
}

impl TabularRow for MeterRecord {
    fn fields(&self) -> Vec<String> {
        MeterRecord::fields(self)
    }
}

impl TabularRow for IntegrationResult {
    fn fields(&self) -> Vec<String> {
        self.summary().iter().map(f64::to_string).collect()
    }
}

/// A `(time, value)` pair from a thinned trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleRow<'a> {
    /// Vendor time column, as written by the scope.
    pub seconds: &'a str,
    /// Sample value.
    pub volts: f64,
}

impl TabularRow for SampleRow<'_> {
    fn fields(&self) -> Vec<String> {
        vec![self.seconds.to_string(), self.volts.to_string()]
    }
}

/// Trait for a reduced-table writer.
pub trait StorageWriter {
    /// Writes raw lines ahead of the table, for formats that can carry them.
    fn write_preamble(&mut self, lines: &[String]) -> Result<()>;

    /// Writes the column header.
    fn write_header(&mut self, columns: &[&str]) -> Result<()>;

    /// Writes one row.
    fn write_row<R: TabularRow>(&mut self, row: &R) -> Result<()>;

    /// Flushes buffered output.
    fn shutdown(&mut self) -> Result<()>;
}

/// A writer for CSV output.
///
/// Preamble lines go straight to the underlying writer, unquoted. The CSV layer takes over
/// at the first header or row, after which no more preamble can be written.
pub struct CsvWriter<W: Write> {
    raw: Option<W>,
    table: Option<csv::Writer<W>>,
}

impl<W: Write> CsvWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            raw: Some(inner),
            table: None,
        }
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        match (self.raw, self.table) {
            (Some(inner), _) => Ok(inner),
            (None, Some(table)) => table
                .into_inner()
                .map_err(|e| TelemetryError::Io(e.into_error())),
            (None, None) => Err(closed()),
        }
    }

    fn table(&mut self) -> Result<&mut csv::Writer<W>> {
        if let Some(inner) = self.raw.take() {
            self.table = Some(csv::WriterBuilder::new().flexible(true).from_writer(inner));
        }
        self.table.as_mut().ok_or_else(closed)
    }
}

fn closed() -> TelemetryError {
    TelemetryError::Io(io::Error::other("CSV writer has no underlying stream"))
}

impl<W: Write> StorageWriter for CsvWriter<W> {
    fn write_preamble(&mut self, lines: &[String]) -> Result<()> {
        let Some(inner) = self.raw.as_mut() else {
            return Err(TelemetryError::Io(io::Error::other(
                "preamble must be written before the table",
            )));
        };
        for line in lines {
            inner.write_all(line.as_bytes())?;
            inner.write_all(b"\n")?;
        }
        Ok(())
    }

    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        self.table()?.write_record(columns)?;
        Ok(())
    }

    fn write_row<R: TabularRow>(&mut self, row: &R) -> Result<()> {
        self.table()?.write_record(row.fields())?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        match (self.raw.as_mut(), self.table.as_mut()) {
            (Some(inner), _) => inner.flush()?,
            (None, Some(table)) => table.flush()?,
            (None, None) => {}
        }
        tracing::debug!("CSV writer shut down.");
        Ok(())
    }
}

/// A writer for newline-delimited JSON output. Headers and preambles are not written.
pub struct JsonLinesWriter<W: Write> {
    inner: W,
}

impl<W: Write> JsonLinesWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> StorageWriter for JsonLinesWriter<W> {
    fn write_preamble(&mut self, _lines: &[String]) -> Result<()> {
        Ok(())
    }

    fn write_header(&mut self, _columns: &[&str]) -> Result<()> {
        Ok(())
    }

    fn write_row<R: TabularRow>(&mut self, row: &R) -> Result<()> {
        serde_json::to_writer(&mut self.inner, row)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Dialect, RecordParser};
    use crate::units::normalize;

    fn reading() -> Reading {
        let obs = RecordParser::new(Dialect::LeafSd)
            .parse("2, 1, 1612714606, 425, 0, 1904, 3480, 0x00")
            .unwrap();
        normalize(&obs)
    }

    #[test]
    fn csv_writer_emits_preamble_header_and_rows() {
        let mut writer = CsvWriter::new(Vec::new());
        writer
            .write_preamble(&["# reduced".to_string(), "Original Time,\"P1\",m3/m3".to_string()])
            .unwrap();
        writer.write_header(&["a", "b"]).unwrap();
        writer
            .write_row(&SampleRow {
                seconds: "-2.000000E-06",
                volts: 0.0,
            })
            .unwrap();
        writer.shutdown().unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        // Preamble lines are written verbatim, never quoted.
        assert_eq!(
            text,
            "# reduced\nOriginal Time,\"P1\",m3/m3\na,b\n-2.000000E-06,0\n"
        );
    }

    #[test]
    fn csv_writer_rejects_preamble_after_rows() {
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_header(&["a"]).unwrap();
        let err = writer.write_preamble(&["late".to_string()]).unwrap_err();
        assert!(matches!(err, TelemetryError::Io(_)));
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "a\n");
    }

    #[test]
    fn csv_writer_with_only_preamble_returns_inner() {
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_preamble(&["only".to_string()]).unwrap();
        writer.shutdown().unwrap();
        assert_eq!(writer.into_inner().unwrap(), b"only\n");
    }

    #[test]
    fn csv_writer_formats_readings() {
        let reading = reading();
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_row(&ReadingRow::new(&reading, false)).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "2,1,2021-02-07 16:16:46,1612714606,0,4.25,19.04,34.8,0x00\n");
    }

    #[test]
    fn integration_summary_has_four_fields() {
        let result = IntegrationResult {
            start_time: 1.0,
            end_time: 2.0,
            total_active_time: 2.0,
            total_charge: 70.0,
            qualifying_samples: 2,
            mean_amplitude: 0.035,
            mean_current: 35.0,
        };
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_header(&IntegrationResult::SUMMARY_COLUMNS).unwrap();
        writer.write_row(&result).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "start_time,end_time,total_time,charge\n1,2,2,70\n");
    }

    #[test]
    fn json_lines_writer_serializes_reading() {
        let reading = reading();
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.write_header(&["ignored"]).unwrap();
        writer.write_row(&ReadingRow::new(&reading, true)).unwrap();
        writer.shutdown().unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["node_id"], "2");
        assert_eq!(value["battery_volts"], 4.25);
        assert_eq!(value["status"], "0x00");
        assert!(value.get("rssi").is_none());
        assert!(text.ends_with('\n'));
    }
}
