use std::sync::Arc;

use parking_lot::RwLock;

use crate::daq::error::DaqError;
use crate::daq::source::SampleBlock;

/// The in-memory record of one acquisition run: per-channel append-only
/// value buffers plus one shared timestamp column.
///
/// Single-writer discipline: only the acquisition worker appends. Readers
/// (preview tick, file drain at stop) take the `RwLock` read guard, so a
/// ragged intermediate state is never observable.
pub struct ChannelLog {
    timestamps: Vec<f64>,
    channels: Vec<Vec<f64>>,
}

pub type SharedChannelLog = Arc<RwLock<ChannelLog>>;

impl ChannelLog {
    pub fn new(channel_count: usize) -> Self {
        Self {
            timestamps: Vec::new(),
            channels: vec![Vec::new(); channel_count],
        }
    }

    pub fn into_shared(self) -> SharedChannelLog {
        Arc::new(RwLock::new(self))
    }

    /// Appends one block and its reconciled timestamps. Validates shape
    /// before touching any buffer, so a failed append mutates nothing.
    pub fn append(&mut self, block: &SampleBlock, timestamps: &[f64]) -> Result<(), DaqError> {
        if block.channels() != self.channels.len() {
            return Err(DaqError::ShapeMismatch {
                expected: self.channels.len(),
                actual: block.channels(),
            });
        }
        if timestamps.len() != block.samples() {
            return Err(DaqError::TimestampMismatch {
                expected: block.samples(),
                actual: timestamps.len(),
            });
        }
        self.timestamps.extend_from_slice(timestamps);
        for (ch, buffer) in self.channels.iter_mut().enumerate() {
            buffer.extend(block.data.row(ch).iter());
        }
        Ok(())
    }

    /// Samples stored per channel so far.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn channel(&self, ch: usize) -> &[f64] {
        &self.channels[ch]
    }

    /// Every `stride`-th (timestamp, value) point per channel. The copy is
    /// bounded by `len() / stride + 1` points, which keeps preview snapshots
    /// cheap no matter how long the run grows.
    pub fn decimated_points(&self, stride: usize) -> Vec<Vec<[f64; 2]>> {
        let stride = stride.max(1);
        self.channels
            .iter()
            .map(|values| {
                (0..self.timestamps.len())
                    .step_by(stride)
                    .map(|i| [self.timestamps[i], values[i]])
                    .collect()
            })
            .collect()
    }

    /// All (timestamp, value) points per channel from `start` onward.
    pub fn points_from(&self, start: usize) -> Vec<Vec<[f64; 2]>> {
        self.channels
            .iter()
            .map(|values| {
                (start..self.timestamps.len())
                    .map(|i| [self.timestamps[i], values[i]])
                    .collect()
            })
            .collect()
    }
}

/// Row-per-line log for the serial sensor stream. Field counts may vary per
/// line; rows are merged into the text file by index at close time.
#[derive(Default)]
pub struct SensorLog {
    rows: Vec<(f64, Vec<f64>)>,
}

pub type SharedSensorLog = Arc<RwLock<SensorLog>>;

impl SensorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedSensorLog {
        Arc::new(RwLock::new(self))
    }

    pub fn append(&mut self, timestamp_ms: f64, values: Vec<f64>) {
        self.rows.push((timestamp_ms, values));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&(f64, Vec<f64>)> {
        self.rows.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn block(channels: usize, samples: usize, base: f64) -> SampleBlock {
        let data = Array2::from_shape_fn((channels, samples), |(ch, s)| {
            base + ch as f64 * 10.0 + s as f64
        });
        SampleBlock::new(data)
    }

    #[test]
    fn append_keeps_channels_equal_length() {
        let mut log = ChannelLog::new(2);
        log.append(&block(2, 3, 0.0), &[1.0, 2.0, 3.0]).unwrap();
        log.append(&block(2, 2, 100.0), &[4.0, 5.0]).unwrap();
        assert_eq!(log.len(), 5);
        assert_eq!(log.channel(0).len(), 5);
        assert_eq!(log.channel(1).len(), 5);
        assert_eq!(log.channel(1)[0], 10.0);
    }

    #[test]
    fn shape_mismatch_mutates_nothing() {
        let mut log = ChannelLog::new(2);
        log.append(&block(2, 2, 0.0), &[1.0, 2.0]).unwrap();
        let err = log.append(&block(3, 2, 0.0), &[3.0, 4.0]).unwrap_err();
        assert!(matches!(err, DaqError::ShapeMismatch { expected: 2, actual: 3 }));
        let err = log.append(&block(2, 2, 0.0), &[3.0]).unwrap_err();
        assert!(matches!(err, DaqError::TimestampMismatch { .. }));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn empty_block_append_is_a_noop() {
        let mut log = ChannelLog::new(2);
        log.append(&block(2, 0, 0.0), &[]).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn decimation_bounds_the_copy() {
        let mut log = ChannelLog::new(1);
        let timestamps: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        log.append(&block(1, 1000, 0.0), &timestamps).unwrap();
        let points = log.decimated_points(5);
        assert_eq!(points[0].len(), 200);
        assert_eq!(points[0][1], [5.0, 5.0]);
    }

    #[test]
    fn sensor_rows_keep_arrival_order() {
        let mut log = SensorLog::new();
        log.append(1.0, vec![0.1, 0.2]);
        log.append(2.0, vec![0.3]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.row(1).unwrap().0, 2.0);
        assert!(log.row(2).is_none());
    }
}
