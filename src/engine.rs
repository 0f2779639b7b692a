// src/engine.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::daq::buffer::{ChannelLog, SensorLog, SharedChannelLog, SharedSensorLog};
use crate::daq::clock::block_timestamps;
use crate::daq::error::DaqError;
use crate::daq::preview::{PreviewRenderer, POINT_BUDGET, TICK_INTERVAL_MS};
use crate::daq::serial::{self, SerialLineTransport};
use crate::daq::sink::{FileFormat, FileSink, RunResult};
use crate::daq::source::{SampleSource, SimulatedSource};
use crate::daq::switch::{DigitalLevels, DigitalSink, LogDigitalSink, DIGITAL_LINE_COUNT};
use crate::types::{
    AcquireParams, EngineCommand, EngineEvent, EngineMessage, RunConfig, RunSummary, SerialConfig,
    SwitchConfig,
};

pub type SourceFactory =
    Box<dyn Fn(&RunConfig) -> Result<Box<dyn SampleSource>, DaqError> + Send>;
pub type DigitalFactory =
    Box<dyn Fn(&RunConfig) -> Result<Box<dyn DigitalSink>, DaqError> + Send>;

/// Factories for the two driver seams. The GUI wires the simulated pair;
/// tests wire deterministic ones.
pub struct Drivers {
    pub source: SourceFactory,
    pub digital: DigitalFactory,
}

impl Drivers {
    pub fn simulated() -> Self {
        Drivers {
            source: Box::new(|config| {
                let p = &config.params;
                let amplitude = p.max_volts.abs().max(p.min_volts.abs()) * 0.8;
                Ok(Box::new(SimulatedSource::new(
                    p.channels,
                    p.rate_hz,
                    p.samples_per_block,
                    amplitude,
                )))
            }),
            digital: Box::new(|_| Ok(Box::new(LogDigitalSink))),
        }
    }
}

/// Spawns the controller thread. `events_tx` is the same channel the UI
/// sends commands on; the engine hands clones to its workers so fault
/// reports arrive through the one dispatch loop.
pub fn spawn_thread(
    tx: Sender<EngineMessage>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    drivers: Drivers,
) -> JoinHandle<()> {
    thread::spawn(move || Engine::new(tx, events_tx, drivers).run(events_rx))
}

/// Everything one live run owns. Dropped as a whole when the run ends.
struct ActiveRun {
    config: RunConfig,
    generation: u64,
    epoch: Instant,
    log: SharedChannelLog,
    sensor_log: Option<SharedSensorLog>,
    sink: Option<FileSink>,
    lenient_parses: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

struct Engine {
    tx: Sender<EngineMessage>,
    events_tx: Sender<EngineEvent>,
    drivers: Drivers,
    // Run-token generation counter shared with every worker. Bumped on
    // start and stop so a stale in-flight callback can never write into a
    // newer run's log.
    token: Arc<AtomicU64>,
    write_enabled: bool,
    format: FileFormat,
    switching: Option<SwitchConfig>,
    serial: Option<SerialConfig>,
    active: Option<ActiveRun>,
}

impl Engine {
    fn new(tx: Sender<EngineMessage>, events_tx: Sender<EngineEvent>, drivers: Drivers) -> Self {
        Self {
            tx,
            events_tx,
            drivers,
            token: Arc::new(AtomicU64::new(0)),
            write_enabled: false,
            format: FileFormat::Text,
            switching: None,
            serial: None,
            active: None,
        }
    }

    fn run(mut self, events: Receiver<EngineEvent>) {
        info!("engine ready");
        self.send(EngineMessage::Log("Engine ready.".to_owned()));
        while let Ok(event) = events.recv() {
            match event {
                EngineEvent::Command(command) => self.handle_command(command),
                EngineEvent::Fault { generation, error } => self.handle_fault(generation, error),
            }
        }
        self.stop_run();
    }

    fn send(&self, message: EngineMessage) {
        let _ = self.tx.send(message);
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start(params) => self.start_run(params),
            EngineCommand::Stop => self.stop_run(),
            EngineCommand::SetWriteEnabled(enabled) => self.write_enabled = enabled,
            EngineCommand::SetFormat(format) => self.format = format,
            EngineCommand::SetSwitching(switching) => self.switching = switching,
            EngineCommand::SetSerial(serial) => self.serial = serial,
        }
    }

    /// A fault from a worker of the current generation unwinds the run; a
    /// stale one (raced against stop) is dropped.
    fn handle_fault(&mut self, generation: u64, error: DaqError) {
        if self.active.as_ref().map(|r| r.generation) != Some(generation) {
            debug!("stale fault ignored: {error}");
            return;
        }
        error!("run fault: {error}");
        self.send(EngineMessage::Error(error.to_string()));
        self.stop_run();
    }

    fn start_run(&mut self, params: AcquireParams) {
        if self.active.is_some() {
            self.send(EngineMessage::Log("Acquisition already running.".to_owned()));
            return;
        }
        let config = RunConfig {
            params,
            write_enabled: self.write_enabled,
            format: self.format,
            switching: self.switching,
            serial: self.serial.clone(),
        };
        match self.try_start(config) {
            Ok(()) => {
                info!("acquisition started");
                self.send(EngineMessage::RunState(true));
                self.send(EngineMessage::Log("Acquisition started.".to_owned()));
            }
            Err(e) => {
                error!("start failed: {e}");
                self.send(EngineMessage::Error(e.to_string()));
                self.send(EngineMessage::RunState(false));
            }
        }
    }

    fn try_start(&mut self, config: RunConfig) -> Result<(), DaqError> {
        // File first: an I/O failure here blocks the run before any driver
        // resource is touched.
        let mut sink = None;
        if config.write_enabled {
            let mut s = FileSink::create(
                &config.params.file_path,
                config.format,
                config.serial.is_some(),
            )?;
            s.write_header(&config.channel_names())?;
            sink = Some(s);
        }

        let source = (self.drivers.source)(&config)?;
        let mut digital = (self.drivers.digital)(&config)?;

        // The tracked line indices apply even when periodic switching is
        // off: the default line is asserted for the whole run.
        let lines = config.switching.unwrap_or_default();
        let mut levels =
            DigitalLevels::new(DIGITAL_LINE_COUNT, lines.default_line, lines.switch_line);
        digital.write_levels(levels.as_slice())?;

        let serial_transport = match &config.serial {
            Some(serial_config) => Some(SerialLineTransport::open(&serial_config.port)?),
            None => None,
        };

        let generation = self.token.fetch_add(1, Ordering::AcqRel) + 1;
        let epoch = Instant::now();
        let log = ChannelLog::new(config.params.channels).into_shared();
        let lenient_parses = Arc::new(AtomicU64::new(0));
        let mut workers = Vec::new();

        // Acquisition: the one path that blocks waiting on data. Reads a
        // block, reconciles timestamps, appends, and re-arms while its
        // generation still matches the token.
        {
            let token = self.token.clone();
            let log = log.clone();
            let events = self.events_tx.clone();
            let rate_hz = config.params.rate_hz;
            let mut source = source;
            workers.push(thread::spawn(move || {
                while token.load(Ordering::Acquire) == generation {
                    match source.read_block() {
                        Ok(block) => {
                            let arrival_ms = epoch.elapsed().as_secs_f64() * 1000.0;
                            let timestamps =
                                block_timestamps(arrival_ms, block.samples(), rate_hz);
                            if token.load(Ordering::Acquire) != generation {
                                break;
                            }
                            if let Err(e) = log.write().append(&block, &timestamps) {
                                let _ = events.send(EngineEvent::Fault { generation, error: e });
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(EngineEvent::Fault { generation, error: e });
                            break;
                        }
                    }
                }
                debug!("acquisition worker done");
            }));
        }

        // Preview: fixed tick, independent of the sample rate. A failure to
        // hand a frame to the UI is fatal to the whole run.
        {
            let token = self.token.clone();
            let log = log.clone();
            let tx = self.tx.clone();
            let events = self.events_tx.clone();
            let channels = config.params.channels;
            workers.push(thread::spawn(move || {
                let mut renderer = PreviewRenderer::new(channels, POINT_BUDGET);
                loop {
                    thread::sleep(Duration::from_millis(TICK_INTERVAL_MS));
                    if token.load(Ordering::Acquire) != generation {
                        break;
                    }
                    let frame = {
                        let guard = log.read();
                        renderer.tick(&guard)
                    };
                    if let Some(frame) = frame {
                        if tx.send(EngineMessage::Preview(frame)).is_err() {
                            let _ = events.send(EngineEvent::Fault {
                                generation,
                                error: DaqError::Disconnected,
                            });
                            break;
                        }
                    }
                }
                debug!("preview worker done");
            }));
        }

        // Periodic digital switching, when enabled.
        if let Some(switch_config) = config.switching {
            let token = self.token.clone();
            let events = self.events_tx.clone();
            let period = Duration::from_millis(switch_config.period_ms);
            workers.push(thread::spawn(move || {
                while sleep_while_current(&token, generation, period) {
                    levels.toggle();
                    if let Err(e) = digital.write_levels(levels.as_slice()) {
                        let _ = events.send(EngineEvent::Fault { generation, error: e });
                        break;
                    }
                }
                debug!("switch worker done");
            }));
        }

        // Serial ingestion, when enabled. The transport's read timeout
        // bounds how long this worker can go without seeing the token.
        let sensor_log = if let Some(transport) = serial_transport {
            let sensor_log = SensorLog::new().into_shared();
            let token = self.token.clone();
            let events = self.events_tx.clone();
            let worker_log = sensor_log.clone();
            let counter = lenient_parses.clone();
            workers.push(thread::spawn(move || {
                if let Err(e) =
                    serial::run_ingest(transport, worker_log, epoch, token, generation, counter)
                {
                    let _ = events.send(EngineEvent::Fault { generation, error: e });
                }
                debug!("serial worker done");
            }));
            Some(sensor_log)
        } else {
            None
        };

        self.active = Some(ActiveRun {
            config,
            generation,
            epoch,
            log,
            sensor_log,
            sink,
            lenient_parses,
            workers,
        });
        Ok(())
    }

    /// The single unwind path: normal stop, fault unwind, and UI shutdown
    /// all land here. Safe to call with no run active.
    fn stop_run(&mut self) {
        let Some(mut run) = self.active.take() else {
            return;
        };

        // Invalidate the generation first; every worker exits at its next
        // token check and any in-flight read completes without re-arming.
        self.token.fetch_add(1, Ordering::AcqRel);
        let elapsed_ms = run.epoch.elapsed().as_secs_f64() * 1000.0;
        for worker in run.workers.drain(..) {
            let _ = worker.join();
        }

        let log = run.log.read();
        let result = RunResult {
            elapsed_ms,
            samples_per_channel: log.len(),
            channel_count: log.channel_count(),
            configured_rate_hz: run.config.params.rate_hz,
        };

        if let Some(mut sink) = run.sink.take() {
            let drained = (|| {
                let sensor = run.sensor_log.as_ref().map(|s| s.read());
                sink.write_rows(&log, sensor.as_deref())?;
                sink.write_footer(&result)?;
                sink.close()
            })();
            if let Err(e) = drained {
                error!("file drain failed: {e}");
                self.send(EngineMessage::Error(e.to_string()));
            }
        }

        info!(
            "acquisition stopped: {} samples/channel over {:.1} ms",
            result.samples_per_channel, result.elapsed_ms
        );
        self.send(EngineMessage::RunFinished(RunSummary {
            result,
            lenient_parses: run.lenient_parses.load(Ordering::Relaxed),
        }));
        self.send(EngineMessage::RunState(false));
        self.send(EngineMessage::Log("Acquisition stopped.".to_owned()));
    }
}

/// Sleeps up to `period` in short slices so a stop is observed promptly.
/// Returns false once the token no longer matches `generation`.
fn sleep_while_current(token: &AtomicU64, generation: u64, period: Duration) -> bool {
    let slice = Duration::from_millis(25);
    let mut remaining = period;
    while remaining > Duration::ZERO {
        thread::sleep(remaining.min(slice));
        if token.load(Ordering::Acquire) != generation {
            return false;
        }
        remaining = remaining.saturating_sub(slice);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq::source::{ManualSource, SampleBlock};
    use ndarray::Array2;
    use parking_lot::Mutex;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voltaq_engine_{tag}_{}", std::process::id()))
    }

    struct RecordingSink(Arc<Mutex<Vec<Vec<bool>>>>);

    impl DigitalSink for RecordingSink {
        fn write_levels(&mut self, levels: &[bool]) -> Result<(), DaqError> {
            self.0.lock().push(levels.to_vec());
            Ok(())
        }
    }

    struct FailingSource {
        delivered: bool,
    }

    impl SampleSource for FailingSource {
        fn read_block(&mut self) -> Result<SampleBlock, DaqError> {
            if self.delivered {
                Err(DaqError::Driver("simulated driver loss".to_owned()))
            } else {
                self.delivered = true;
                Ok(SampleBlock::new(Array2::zeros((1, 10))))
            }
        }
    }

    fn wait_for<F: Fn(&EngineMessage) -> bool>(
        rx: &mpsc::Receiver<EngineMessage>,
        pred: F,
    ) -> EngineMessage {
        loop {
            let message = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("engine message");
            if pred(&message) {
                return message;
            }
        }
    }

    #[test]
    fn scenario_three_blocks_to_text_file() {
        let path = temp_path("scenario.txt");
        fs::remove_file(&path).ok();
        let (tx, rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let levels = Arc::new(Mutex::new(Vec::new()));
        let levels_in_test = levels.clone();
        let drivers = Drivers {
            source: Box::new(|config| {
                let channels = config.params.channels;
                let blocks: Vec<SampleBlock> = (0..3)
                    .map(|b| {
                        SampleBlock::new(Array2::from_shape_fn(
                            (channels, config.params.samples_per_block),
                            |(ch, s)| b as f64 + ch as f64 * 0.5 + s as f64 * 1e-4,
                        ))
                    })
                    .collect();
                Ok(Box::new(
                    ManualSource::new(blocks, channels).paced(config.params.rate_hz),
                ))
            }),
            digital: Box::new(move |_| Ok(Box::new(RecordingSink(levels_in_test.clone())))),
        };
        spawn_thread(tx, events_tx.clone(), events_rx, drivers);

        events_tx
            .send(EngineCommand::SetWriteEnabled(true).into())
            .unwrap();
        events_tx
            .send(EngineCommand::SetFormat(FileFormat::Text).into())
            .unwrap();
        events_tx
            .send(
                EngineCommand::SetSwitching(Some(SwitchConfig {
                    default_line: 0,
                    switch_line: 1,
                    period_ms: 200,
                }))
                .into(),
            )
            .unwrap();
        events_tx
            .send(
                EngineCommand::Start(AcquireParams {
                    channels: 2,
                    rate_hz: 1000.0,
                    samples_per_block: 1000,
                    file_path: path.clone(),
                    ..AcquireParams::default()
                })
                .into(),
            )
            .unwrap();
        wait_for(&rx, |m| matches!(m, EngineMessage::RunState(true)));

        // Three paced blocks take ~3 s; stop shortly after they land.
        thread::sleep(Duration::from_millis(3250));
        events_tx.send(EngineCommand::Stop.into()).unwrap();

        let mut saw_preview = false;
        let summary = loop {
            match wait_for(&rx, |m| {
                matches!(m, EngineMessage::Preview(_) | EngineMessage::RunFinished(_))
            }) {
                EngineMessage::Preview(frame) => {
                    saw_preview = true;
                    assert!(frame.series.iter().all(|s| s.len() <= POINT_BUDGET));
                }
                EngineMessage::RunFinished(summary) => break summary,
                _ => unreachable!(),
            }
        };

        assert!(saw_preview);
        assert_eq!(summary.result.samples_per_channel, 3000);
        assert_eq!(summary.result.channel_count, 2);
        let achieved = summary.result.achieved_rate_hz();
        assert!(
            (achieved - 1000.0).abs() < 120.0,
            "achieved rate {achieved} too far from 1000"
        );

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Number of Samples per Channel: 3000"));
        assert!(contents.contains("Sampling Frequency in Hz: 1000"));
        assert_eq!(contents.lines().count(), 1 + 3000 + 6);

        // Initial vector plus periodic whole-vector toggles.
        let written = levels.lock();
        assert_eq!(written[0], vec![true, false, false, false]);
        assert!(written.len() > 1);
        assert!(written.iter().all(|v| v.len() == DIGITAL_LINE_COUNT));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn driver_fault_unwinds_once() {
        let (tx, rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let drivers = Drivers {
            source: Box::new(|_| Ok(Box::new(FailingSource { delivered: false }))),
            digital: Box::new(|_| Ok(Box::new(LogDigitalSink))),
        };
        spawn_thread(tx, events_tx.clone(), events_rx, drivers);

        events_tx
            .send(
                EngineCommand::Start(AcquireParams {
                    channels: 1,
                    samples_per_block: 10,
                    ..AcquireParams::default()
                })
                .into(),
            )
            .unwrap();
        wait_for(&rx, |m| matches!(m, EngineMessage::RunState(true)));
        wait_for(&rx, |m| matches!(m, EngineMessage::Error(_)));
        wait_for(&rx, |m| matches!(m, EngineMessage::RunFinished(_)));
        wait_for(&rx, |m| matches!(m, EngineMessage::RunState(false)));

        // A stop after the unwind is a no-op: no second summary.
        events_tx.send(EngineCommand::Stop.into()).unwrap();
        events_tx
            .send(EngineCommand::SetWriteEnabled(false).into())
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        let leftover: Vec<EngineMessage> = rx.try_iter().collect();
        assert!(leftover
            .iter()
            .all(|m| !matches!(m, EngineMessage::RunFinished(_))));
    }

    #[test]
    fn unwritable_path_blocks_start() {
        let path = temp_path("missing_dir").join("sub").join("out.txt");
        let (tx, rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let drivers = Drivers {
            source: Box::new(|_| {
                panic!("source must not be constructed when the file cannot be created")
            }),
            digital: Box::new(|_| Ok(Box::new(LogDigitalSink))),
        };
        spawn_thread(tx, events_tx.clone(), events_rx, drivers);

        events_tx
            .send(EngineCommand::SetWriteEnabled(true).into())
            .unwrap();
        events_tx
            .send(
                EngineCommand::Start(AcquireParams {
                    file_path: path,
                    ..AcquireParams::default()
                })
                .into(),
            )
            .unwrap();
        wait_for(&rx, |m| matches!(m, EngineMessage::Error(_)));
        wait_for(&rx, |m| matches!(m, EngineMessage::RunState(false)));
    }
}
