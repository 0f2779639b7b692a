// src/daq/mod.rs
pub mod buffer;
pub mod clock;
pub mod error;
pub mod preview;
pub mod serial;
pub mod sink;
pub mod source;
pub mod switch;

pub use buffer::{ChannelLog, SensorLog, SharedChannelLog, SharedSensorLog};
pub use clock::block_timestamps;
pub use error::DaqError;
pub use preview::{PreviewFrame, PreviewRenderer};
pub use serial::{parse_sensor_line, LineTransport, SerialLineTransport};
pub use sink::{FileFormat, FileSink, RunResult};
pub use source::{ManualSource, SampleBlock, SampleSource, SimulatedSource};
pub use switch::{DigitalLevels, DigitalSink, LogDigitalSink};
