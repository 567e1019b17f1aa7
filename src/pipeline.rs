//! Pipeline drivers.
//!
//! Log inputs run Parser → Decimator → Normalizer → writer. Trace inputs run
//! Trace → Lowpass filter → Charge integrator. The drivers own the skip-and-log policy for
//! malformed lines; parsers only report what went wrong.

use crate::config::{MeterConfig, NodeLogConfig, TraceConfig};
use crate::data::iir_filter::LowpassFilter;
use crate::data::integrator::{ChargeIntegrator, IntegrationResult};
use crate::data::storage::{ReadingRow, SampleRow, StorageWriter};
use crate::data::trace::Trace;
use crate::decimate::{DecimateExt, DecimationPolicy};
use crate::error::{Result, TelemetryError};
use crate::record::meter::{MeterParser, MeterRecord};
use crate::record::{Observation, ParseFailure, RecordParser, TimestampUnit};
use crate::units::normalize;
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, BufRead, Read};
use tracing::{debug, info, warn};

/// Column names of a reduced node table, without RSSI.
pub const NODE_COLUMNS: [&str; 9] = [
    "node",
    "sequence",
    "time_utc",
    "epoch_seconds",
    "tx_ms",
    "battery_v",
    "temperature_c",
    "humidity_pct",
    "status",
];

/// Column names of a thinned trace.
pub const SAMPLE_COLUMNS: [&str; 2] = ["seconds", "volts"];

/// Counters for one reduction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReductionStats {
    /// Input lines seen, header lines included.
    pub lines_read: usize,
    /// Lines that parsed into a record.
    pub observations: usize,
    /// Rows written.
    pub emitted: usize,
    /// Records suppressed by decimation.
    pub dropped: usize,
    /// Lines skipped because they did not parse.
    pub malformed: usize,
    /// Records recovered by reading the timestamp as milliseconds.
    pub rescaled: usize,
}

/// Numbered text lines from a byte stream.
///
/// Invalid UTF-8 is replaced rather than ending the stream, so one corrupted radio line
/// only costs that line. I/O errors are kept for the caller.
struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    error: Option<io::Error>,
}

impl<R: BufRead> LineSource<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            error: None,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line += 1;
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                let text = String::from_utf8_lossy(&self.buf);
                if matches!(text, Cow::Owned(_)) {
                    debug!(line = self.line, "Replaced invalid UTF-8");
                }
                Some(text.into_owned())
            }
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Streams observations out of a node log, skipping and logging lines that do not parse.
///
/// I/O errors end the stream; [`ObservationReader::finish`] reports them.
pub struct ObservationReader<R> {
    source: LineSource<R>,
    parser: RecordParser,
    rescale: Option<RecordParser>,
    stats: ReductionStats,
}

impl<R: BufRead> ObservationReader<R> {
    /// Reads `reader` with `parser`. When `rescale_millis` is set, implausible timestamps are
    /// retried as epoch milliseconds.
    pub fn new(reader: R, parser: RecordParser, rescale_millis: bool) -> Self {
        let rescale =
            rescale_millis.then(|| parser.with_timestamp_unit(TimestampUnit::Milliseconds));
        Self {
            source: LineSource::new(reader),
            parser,
            rescale,
            stats: ReductionStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ReductionStats {
        self.stats
    }

    /// Ends the stream, returning the counters or the I/O error that stopped it.
    pub fn finish(self) -> Result<ReductionStats> {
        self.source.finish()?;
        Ok(self.stats)
    }

    fn parse_line(&mut self, text: &str) -> std::result::Result<Observation, ParseFailure> {
        match self.parser.parse(text) {
            Err(failure) if failure.is_implausible_timestamp() => {
                let Some(rescale) = self.rescale else {
                    return Err(failure);
                };
                let observation = rescale.parse(text).map_err(|_| failure)?;
                debug!(line = self.source.line, "Rescaled millisecond timestamp");
                self.stats.rescaled += 1;
                Ok(observation)
            }
            outcome => outcome,
        }
    }
}

impl<R: BufRead> Iterator for ObservationReader<R> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        loop {
            let text = self.source.next_line()?;
            self.stats.lines_read += 1;
            let line = self.source.line;

            match self.parse_line(&text) {
                Ok(observation) => {
                    self.stats.observations += 1;
                    return Some(observation);
                }
                Err(failure) => {
                    self.stats.malformed += 1;
                    let non_data = failure.is_non_data();
                    let error = match failure {
                        ParseFailure::ImplausibleTimestamp { value } => {
                            TelemetryError::ImplausibleTimestamp(value)
                        }
                        source => TelemetryError::MalformedRecord { line, source },
                    };
                    if non_data {
                        debug!(line, error = %error, "Skipping non-data line");
                    } else {
                        warn!(line, error = %error, "Skipping malformed record");
                    }
                }
            }
        }
    }
}

/// Streams METER logger rows, skipping blank lines and logging rows that do not parse.
struct MeterRowReader<R> {
    source: LineSource<R>,
    parser: MeterParser,
    stats: ReductionStats,
}

impl<R: BufRead> Iterator for MeterRowReader<R> {
    type Item = MeterRecord;

    fn next(&mut self) -> Option<MeterRecord> {
        loop {
            let text = self.source.next_line()?;
            self.stats.lines_read += 1;
            if text.trim().is_empty() {
                continue;
            }
            match self.parser.parse(&text) {
                Ok(record) => {
                    self.stats.observations += 1;
                    return Some(record);
                }
                Err(source) => {
                    self.stats.malformed += 1;
                    let line = self.source.line;
                    let error = TelemetryError::MalformedRecord { line, source };
                    warn!(line, error = %error, "Skipping malformed logger row");
                }
            }
        }
    }
}

/// Reduces a node log to a table of normalised readings.
pub fn reduce_node_log<R: BufRead, W: StorageWriter>(
    reader: R,
    config: &NodeLogConfig,
    writer: &mut W,
) -> Result<ReductionStats> {
    let policy = if config.hourly {
        DecimationPolicy::Hourly
    } else {
        DecimationPolicy::from_interval(config.interval_minutes)
    };
    let with_rssi = config.dialect.has_rssi();
    debug!(dialect = ?config.dialect, ?policy, "Reducing node log");

    let mut columns = NODE_COLUMNS.to_vec();
    if with_rssi {
        columns.push("rssi");
    }
    writer.write_header(&columns)?;

    let mut source =
        ObservationReader::new(reader, RecordParser::new(config.dialect), config.rescale_millis);
    let mut rows = (&mut source).decimate(policy);
    let mut emitted = 0;
    for observation in rows.by_ref() {
        let reading = normalize(&observation);
        writer.write_row(&ReadingRow::new(&reading, with_rssi))?;
        emitted += 1;
    }
    let dropped = rows.dropped();
    writer.shutdown()?;

    let mut stats = source.finish()?;
    stats.emitted = emitted;
    stats.dropped = dropped;
    info!(
        lines = stats.lines_read,
        emitted = stats.emitted,
        dropped = stats.dropped,
        malformed = stats.malformed,
        rescaled = stats.rescaled,
        "Reduced node log"
    );
    Ok(stats)
}

/// Reduces a METER logger export, echoing its header block and correcting each timestamp.
///
/// Rows are written as they are read.
pub fn reduce_meter<R: BufRead, W: StorageWriter>(
    reader: R,
    config: &MeterConfig,
    writer: &mut W,
) -> Result<ReductionStats> {
    let parser = MeterParser::new(config.offset_seconds)?;
    let policy = DecimationPolicy::aligned(config.interval_minutes);
    let mut source = LineSource::new(reader);

    let mut preamble = Vec::with_capacity(config.header_lines);
    for index in 0..config.header_lines {
        let Some(text) = source.next_line() else {
            break;
        };
        let prefix = if index + 1 == config.header_lines {
            "Original Time,"
        } else {
            "blank,"
        };
        preamble.push(format!("{prefix}{}", text.trim_end()));
    }
    writer.write_preamble(&preamble)?;

    let mut records = MeterRowReader {
        source,
        parser,
        stats: ReductionStats {
            lines_read: preamble.len(),
            ..ReductionStats::default()
        },
    };
    let mut rows = (&mut records).decimate(policy);
    let mut emitted = 0;
    for record in rows.by_ref() {
        writer.write_row(&record)?;
        emitted += 1;
    }
    let dropped = rows.dropped();
    writer.shutdown()?;

    records.source.finish()?;
    let stats = ReductionStats {
        emitted,
        dropped,
        ..records.stats
    };
    info!(
        lines = stats.lines_read,
        emitted = stats.emitted,
        dropped = stats.dropped,
        malformed = stats.malformed,
        "Reduced logger export"
    );
    Ok(stats)
}

/// Loads, filters and integrates one current trace.
pub fn analyze_trace<R: Read>(reader: R, config: &TraceConfig) -> Result<IntegrationResult> {
    let trace = Trace::from_reader(
        reader,
        config.skip_rows,
        config.delta_t,
        config.voltage_offset,
    )?;
    let filter = LowpassFilter::new(&config.to_lowpass_config())?;
    let filtered = filter.apply(&trace);
    let integrator =
        ChargeIntegrator::new(config.zero_threshold, config.resistance_ohms, config.unit_scale)?;
    let result = integrator.integrate(&filtered)?;
    info!(
        samples = trace.len(),
        active = result.qualifying_samples,
        charge = result.total_charge,
        "Integrated trace"
    );
    Ok(result)
}

/// Writes every `sample_every`-th trace row for plotting, values at or below the zero
/// threshold rendered as 0. Returns the number of rows written.
///
/// Rows keep the scope's own time text and raw values; `voltage_offset` only applies to
/// charge analysis.
pub fn sample_trace<R: Read, W: StorageWriter>(
    reader: R,
    config: &TraceConfig,
    writer: &mut W,
) -> Result<usize> {
    let trace = Trace::from_reader(reader, config.skip_rows, config.delta_t, 0.0)?;
    writer.write_header(&SAMPLE_COLUMNS)?;
    let rows = trace.thin(config.sample_every, config.zero_threshold);
    for &(seconds, volts) in &rows {
        writer.write_row(&SampleRow { seconds, volts })?;
    }
    writer.shutdown()?;
    debug!(samples = trace.len(), rows = rows.len(), "Thinned trace");
    Ok(rows.len())
}
