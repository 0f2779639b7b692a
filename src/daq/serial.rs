use std::io::{BufRead, BufReader, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::daq::buffer::SharedSensorLog;
use crate::daq::error::DaqError;

pub const SERIAL_BAUD: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Line-oriented transport. `None` means "no data this cycle" (a read
/// timeout), which bounds how long the worker can go without observing the
/// run token.
pub trait LineTransport: Send {
    fn next_line(&mut self) -> Result<Option<String>, DaqError>;
}

/// Serial-port transport at the fixed sensor baud rate.
pub struct SerialLineTransport {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    pending: String,
}

impl SerialLineTransport {
    pub fn open(port_name: &str) -> Result<Self, DaqError> {
        let port = serialport::new(port_name, SERIAL_BAUD)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| DaqError::Driver(format!("serial port {port_name}: {e}")))?;
        Ok(Self {
            reader: BufReader::new(port),
            pending: String::new(),
        })
    }
}

impl LineTransport for SerialLineTransport {
    fn next_line(&mut self) -> Result<Option<String>, DaqError> {
        // A timeout can land mid-line; the partial stays in `pending` and the
        // next call keeps appending to it.
        match self.reader.read_line(&mut self.pending) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let line = std::mem::take(&mut self.pending);
                Ok(Some(line.trim_end().to_owned()))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!("dropping non-UTF8 serial line");
                self.pending.clear();
                Ok(None)
            }
            Err(e) => Err(DaqError::Io(e)),
        }
    }
}

/// Splits a sensor line on commas and parses each field as f64. A field
/// that fails to parse is recorded as 0.0; the number of such fallbacks is
/// returned so the run can report how often the policy fired.
pub fn parse_sensor_line(line: &str) -> (Vec<f64>, u32) {
    let mut fallbacks = 0;
    let values = line
        .split(',')
        .map(|field| match field.trim().parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                fallbacks += 1;
                0.0
            }
        })
        .collect();
    (values, fallbacks)
}

/// Ingest loop: runs until the run token moves past `generation`. Each line
/// becomes one sensor row stamped against the shared run epoch (the
/// single-sample branch of timestamp reconciliation: arrival time, no
/// back-dating).
pub fn run_ingest(
    mut transport: impl LineTransport,
    log: SharedSensorLog,
    epoch: Instant,
    token: Arc<AtomicU64>,
    generation: u64,
    lenient_parses: Arc<AtomicU64>,
) -> Result<(), DaqError> {
    while token.load(Ordering::Acquire) == generation {
        let Some(line) = transport.next_line()? else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        let arrival_ms = epoch.elapsed().as_secs_f64() * 1000.0;
        let (values, fallbacks) = parse_sensor_line(&line);
        lenient_parses.fetch_add(u64::from(fallbacks), Ordering::Relaxed);
        log.write().append(arrival_ms, values);
    }
    Ok(())
}
