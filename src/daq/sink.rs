use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::daq::buffer::{ChannelLog, SensorLog};
use crate::daq::error::DaqError;

/// Wire format of the output artifact, fixed for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    Text,
    Binary,
}

/// Fixed sensor column names for the serial stream, written after the
/// analog channel names when serial ingestion is enabled.
pub const SENSOR_COLUMNS: [&str; 4] = ["AccTimestamp (ms)", "Acc X (g)", "Acc Y (g)", "Acc Z (g)"];

/// Summary of a finished run, consumed once by the text footer and the
/// operator-facing report.
#[derive(Clone, Copy, Debug)]
pub struct RunResult {
    pub elapsed_ms: f64,
    pub samples_per_channel: usize,
    pub channel_count: usize,
    pub configured_rate_hz: f64,
}

impl RunResult {
    pub fn total_samples(&self) -> usize {
        self.samples_per_channel * self.channel_count
    }

    pub fn achieved_rate_hz(&self) -> f64 {
        if self.elapsed_ms > 0.0 {
            self.samples_per_channel as f64 * 1000.0 / self.elapsed_ms
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
enum SinkWriter {
    Text(BufWriter<std::fs::File>),
    Binary(BufWriter<std::fs::File>),
}

/// Serializes a run's logs to disk.
///
/// Text files carry timestamps and a trailing summary block; binary files
/// carry only the channel-name preamble and the raw sample matrix. The
/// asymmetry is deliberate: downstream tooling depends on the documented
/// binary layout.
#[derive(Debug)]
pub struct FileSink {
    writer: Option<SinkWriter>,
    serial_enabled: bool,
}

impl FileSink {
    /// Create-only open: refuses to touch an existing file. The overwrite
    /// prompt lives at the UI boundary, not here.
    pub fn create(path: &Path, format: FileFormat, serial_enabled: bool) -> Result<Self, DaqError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let buffered = BufWriter::new(file);
        let writer = match format {
            FileFormat::Text => SinkWriter::Text(buffered),
            FileFormat::Binary => SinkWriter::Binary(buffered),
        };
        Ok(Self {
            writer: Some(writer),
            serial_enabled,
        })
    }

    /// Channel-name header. Text: one tab-terminated column name per
    /// channel, plus the fixed sensor columns when serial is enabled.
    /// Binary: length-prefixed UTF-8 names followed by a CRLF sentinel.
    pub fn write_header(&mut self, channel_names: &[String]) -> Result<(), DaqError> {
        match self.writer.as_mut() {
            Some(SinkWriter::Text(w)) => {
                write!(w, "DAQTimestamp (ms)\t")?;
                for name in channel_names {
                    write!(w, "{name}\t")?;
                }
                if self.serial_enabled {
                    for column in SENSOR_COLUMNS {
                        write!(w, "{column}\t")?;
                    }
                }
                writeln!(w)?;
            }
            Some(SinkWriter::Binary(w)) => {
                for name in channel_names {
                    let bytes = name.as_bytes();
                    w.write_all(&[bytes.len() as u8])?;
                    w.write_all(bytes)?;
                }
                w.write_all(b"\r\n")?;
            }
            None => {}
        }
        Ok(())
    }

    /// Drains the logs: one row per sample index. Sensor rows are merged by
    /// index while they last; later rows carry analog columns only.
    pub fn write_rows(&mut self, log: &ChannelLog, sensor: Option<&SensorLog>) -> Result<(), DaqError> {
        match self.writer.as_mut() {
            Some(SinkWriter::Text(w)) => {
                let timestamps = log.timestamps();
                for i in 0..log.len() {
                    write!(w, "{:.6e}\t", timestamps[i])?;
                    for ch in 0..log.channel_count() {
                        write!(w, "{:.6e}\t", log.channel(ch)[i])?;
                    }
                    if let Some((ts, values)) = sensor.and_then(|s| s.row(i)) {
                        write!(w, "{ts:.6e}\t")?;
                        for value in values {
                            write!(w, "{value:.6e}\t")?;
                        }
                    }
                    writeln!(w)?;
                }
            }
            Some(SinkWriter::Binary(w)) => {
                for i in 0..log.len() {
                    for ch in 0..log.channel_count() {
                        w.write_all(&log.channel(ch)[i].to_le_bytes())?;
                    }
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Trailing summary block. Text only; the binary format has no footer.
    pub fn write_footer(&mut self, result: &RunResult) -> Result<(), DaqError> {
        if let Some(SinkWriter::Text(w)) = self.writer.as_mut() {
            writeln!(w, "\nTotal of Samples: {}", result.total_samples())?;
            writeln!(
                w,
                "Number of Samples per Channel: {}",
                result.samples_per_channel
            )?;
            writeln!(w, "Elapsed Time in ms: {:.4}", result.elapsed_ms)?;
            writeln!(w, "Sampling Frequency in Hz: {}", result.configured_rate_hz)?;
            write!(
                w,
                "Estimated Sampling Frequency in Hz: {}",
                result.achieved_rate_hz()
            )?;
        }
        Ok(())
    }

    /// Flushes and releases the file. Safe to call twice and safe on the
    /// error-unwind path even if no rows were ever written.
    pub fn close(&mut self) -> Result<(), DaqError> {
        if let Some(writer) = self.writer.take() {
            match writer {
                SinkWriter::Text(mut w) => w.flush()?,
                SinkWriter::Binary(mut w) => w.flush()?,
            }
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
