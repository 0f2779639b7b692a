// src/types.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::daq::error::DaqError;
use crate::daq::preview::PreviewFrame;
use crate::daq::sink::{FileFormat, RunResult};

/// Acquisition parameters chosen per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquireParams {
    pub channels: usize,
    pub rate_hz: f64,
    pub samples_per_block: usize,
    pub min_volts: f64,
    pub max_volts: f64,
    pub file_path: PathBuf,
}

impl Default for AcquireParams {
    fn default() -> Self {
        Self {
            channels: 1,
            rate_hz: 1000.0,
            samples_per_block: 1000,
            min_volts: -6.0,
            max_volts: 6.0,
            file_path: PathBuf::from("acquisitionData.txt"),
        }
    }
}

/// Digital output switching: the two tracked line indices and the toggle
/// period.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub default_line: usize,
    pub switch_line: usize,
    pub period_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            default_line: 0,
            switch_line: 1,
            period_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
}

/// Immutable snapshot of everything a run needs, taken when the run starts.
/// A new run requires a new snapshot; nothing here is mutated mid-run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub params: AcquireParams,
    pub write_enabled: bool,
    pub format: FileFormat,
    pub switching: Option<SwitchConfig>,
    pub serial: Option<SerialConfig>,
}

impl RunConfig {
    /// Physical channel names in acquisition order, AI0 upward.
    pub fn channel_names(&self) -> Vec<String> {
        (0..self.params.channels)
            .map(|i| format!("Dev1/ai{i}"))
            .collect()
    }
}

/// Operator commands into the engine. Setters adjust the draft used by the
/// next start; a running acquisition is never reconfigured.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Start(AcquireParams),
    Stop,
    SetWriteEnabled(bool),
    SetFormat(FileFormat),
    SetSwitching(Option<SwitchConfig>),
    SetSerial(Option<SerialConfig>),
}

/// Everything the engine's dispatch loop consumes: operator commands and
/// fault reports raised by the run's worker threads.
#[derive(Debug)]
pub enum EngineEvent {
    Command(EngineCommand),
    Fault { generation: u64, error: DaqError },
}

impl From<EngineCommand> for EngineEvent {
    fn from(command: EngineCommand) -> Self {
        EngineEvent::Command(command)
    }
}

/// Outcome of one run, reported to the operator when it stops.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub result: RunResult,
    pub lenient_parses: u64,
}

/// Engine-to-UI stream.
#[derive(Debug)]
pub enum EngineMessage {
    Log(String),
    RunState(bool),
    Preview(PreviewFrame),
    Error(String),
    RunFinished(RunSummary),
}
