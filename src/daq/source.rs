use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use ndarray::Array2;
use rand::Rng;

use crate::daq::error::DaqError;

/// One delivery from the sample source: `channels x samples` readings.
#[derive(Clone, Debug)]
pub struct SampleBlock {
    pub data: Array2<f64>,
}

impl SampleBlock {
    pub fn new(data: Array2<f64>) -> Self {
        Self { data }
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }
}

/// Something that can deliver sample blocks on demand.
///
/// `read_block` may block until a full block is available; the acquisition
/// worker loops over it and re-issues the read while the run is live.
pub trait SampleSource: Send {
    fn read_block(&mut self) -> Result<SampleBlock, DaqError>;
}

/// Software stand-in for the hardware driver: paced sine waves plus noise.
pub struct SimulatedSource {
    channels: usize,
    rate_hz: f64,
    samples_per_block: usize,
    amplitude: f64,
    sample_index: u64,
}

impl SimulatedSource {
    pub fn new(channels: usize, rate_hz: f64, samples_per_block: usize, amplitude: f64) -> Self {
        Self {
            channels,
            rate_hz,
            samples_per_block,
            amplitude,
            sample_index: 0,
        }
    }
}

impl SampleSource for SimulatedSource {
    fn read_block(&mut self) -> Result<SampleBlock, DaqError> {
        // Pace like hardware: a block becomes available once its capture
        // window has elapsed.
        thread::sleep(Duration::from_secs_f64(
            self.samples_per_block as f64 / self.rate_hz,
        ));

        let mut rng = rand::thread_rng();
        let mut data = Array2::zeros((self.channels, self.samples_per_block));
        for ch in 0..self.channels {
            let freq = 1.0 + ch as f64 * 0.5;
            for s in 0..self.samples_per_block {
                let t = (self.sample_index + s as u64) as f64 / self.rate_hz;
                let noise: f64 = rng.gen_range(-0.02..0.02);
                data[[ch, s]] = self.amplitude * (TAU * freq * t).sin() + noise * self.amplitude;
            }
        }
        self.sample_index += self.samples_per_block as u64;
        Ok(SampleBlock::new(data))
    }
}

/// Deterministic queued source for tests. Once drained it idles, returning
/// empty blocks so the acquisition loop keeps polling until the run stops.
pub struct ManualSource {
    queue: VecDeque<SampleBlock>,
    channels: usize,
    pace: Option<Duration>,
}

impl ManualSource {
    pub fn new(blocks: impl IntoIterator<Item = SampleBlock>, channels: usize) -> Self {
        Self {
            queue: blocks.into_iter().collect(),
            channels,
            pace: None,
        }
    }

    /// Delay each delivery by the block's capture window at `rate_hz`.
    pub fn paced(mut self, rate_hz: f64) -> Self {
        self.pace = Some(Duration::from_secs_f64(1.0 / rate_hz));
        self
    }
}

impl SampleSource for ManualSource {
    fn read_block(&mut self) -> Result<SampleBlock, DaqError> {
        match self.queue.pop_front() {
            Some(block) => {
                if let Some(per_sample) = self.pace {
                    thread::sleep(per_sample * block.samples() as u32);
                }
                Ok(block)
            }
            None => {
                thread::sleep(Duration::from_millis(5));
                Ok(SampleBlock::new(Array2::zeros((self.channels, 0))))
            }
        }
    }
}
