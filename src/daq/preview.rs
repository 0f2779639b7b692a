use std::collections::VecDeque;

use crate::daq::buffer::ChannelLog;

/// Most points kept on screen per channel.
pub const POINT_BUDGET: usize = 200;
/// Preview tick period, independent of the sample rate.
pub const TICK_INTERVAL_MS: u64 = 10;
/// Axis half-height for a constant zero signal.
const FLAT_ZERO_EPSILON: f64 = 1e-3;

/// One rendered snapshot handed to the UI. X is seconds, Y is volts.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub series: Vec<Vec<[f64; 2]>>,
    pub bounds: (f64, f64),
    pub bounds_changed: bool,
    pub tick: u64,
}

/// Display bounds padded outward by 10 % of the range, or 10 % of the
/// magnitude for a constant signal so the axis never collapses.
pub fn padded_bounds(min: f64, max: f64) -> (f64, f64) {
    if min != max {
        let span = max - min;
        (min - 0.1 * span, max + 0.1 * span)
    } else if min != 0.0 {
        (min - 0.1 * min.abs(), max + 0.1 * max.abs())
    } else {
        (-FLAT_ZERO_EPSILON, FLAT_ZERO_EPSILON)
    }
}

/// Consumes log snapshots on a fixed tick and maintains a bounded set of
/// display points per channel.
///
/// Below the point budget new samples are appended and the oldest displayed
/// point is evicted once the window is full; above the budget the whole log
/// is re-decimated with a stride so at most the budget survives. Points are
/// dropped, never averaged.
pub struct PreviewRenderer {
    budget: usize,
    last_len: usize,
    displayed: Vec<VecDeque<[f64; 2]>>,
    last_bounds: Option<(f64, f64)>,
    tick_count: u64,
}

impl PreviewRenderer {
    pub fn new(channel_count: usize, budget: usize) -> Self {
        Self {
            budget,
            last_len: 0,
            displayed: vec![VecDeque::new(); channel_count],
            last_bounds: None,
            tick_count: 0,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// One render pass. Returns `None` when the log has not grown since the
    /// last tick; the tick counter still advances.
    pub fn tick(&mut self, log: &ChannelLog) -> Option<PreviewFrame> {
        self.tick_count += 1;

        let total = log.len();
        if total == self.last_len || self.displayed.is_empty() {
            return None;
        }

        if total > self.budget {
            let stride = (total + self.budget - 1) / self.budget;
            for (deque, points) in self.displayed.iter_mut().zip(log.decimated_points(stride)) {
                *deque = points
                    .into_iter()
                    .map(|[ts, v]| [ts / 1000.0, v])
                    .collect();
            }
        } else {
            for (deque, fresh) in self.displayed.iter_mut().zip(log.points_from(self.last_len)) {
                deque.extend(fresh.into_iter().map(|[ts, v]| [ts / 1000.0, v]));
                while deque.len() > self.budget {
                    deque.pop_front();
                }
            }
        }
        self.last_len = total;

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for deque in &self.displayed {
            for point in deque {
                min = min.min(point[1]);
                max = max.max(point[1]);
            }
        }
        let bounds = padded_bounds(min, max);
        let bounds_changed = self.last_bounds != Some(bounds);
        if bounds_changed {
            self.last_bounds = Some(bounds);
        }

        Some(PreviewFrame {
            series: self
                .displayed
                .iter()
                .map(|deque| deque.iter().copied().collect())
                .collect(),
            bounds,
            bounds_changed,
            tick: self.tick_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq::clock::block_timestamps;
    use crate::daq::source::SampleBlock;
    use ndarray::Array2;

    fn append(log: &mut ChannelLog, samples: usize, f: impl Fn(usize, usize) -> f64) {
        let start = log.len();
        let data = Array2::from_shape_fn((log.channel_count(), samples), |(ch, s)| f(ch, s));
        let arrival = (start + samples) as f64;
        let timestamps = block_timestamps(arrival, samples, 1000.0);
        log.append(&SampleBlock::new(data), &timestamps).unwrap();
    }

    #[test]
    fn displayed_points_never_exceed_budget() {
        let mut log = ChannelLog::new(2);
        let mut renderer = PreviewRenderer::new(2, POINT_BUDGET);
        for round in 0..20 {
            append(&mut log, 777, |ch, s| (ch + s + round) as f64);
            let frame = renderer.tick(&log).unwrap();
            for series in &frame.series {
                assert!(series.len() <= POINT_BUDGET);
            }
        }
    }

    #[test]
    fn unchanged_snapshot_is_a_noop_but_ticks() {
        let mut log = ChannelLog::new(1);
        let mut renderer = PreviewRenderer::new(1, POINT_BUDGET);
        append(&mut log, 10, |_, s| s as f64);
        assert!(renderer.tick(&log).is_some());
        assert!(renderer.tick(&log).is_none());
        assert_eq!(renderer.tick_count(), 2);
    }

    #[test]
    fn constant_signal_pads_by_magnitude() {
        assert_eq!(padded_bounds(5.0, 5.0), (4.5, 5.5));
        let (lo, hi) = padded_bounds(0.0, 0.0);
        assert!(lo < 0.0 && hi > 0.0);
    }

    #[test]
    fn range_pads_by_ten_percent() {
        let (lo, hi) = padded_bounds(2.0, 4.0);
        assert!((lo - 1.8).abs() < 1e-12);
        assert!((hi - 4.2).abs() < 1e-12);
    }

    #[test]
    fn bounds_only_report_changed_when_they_move() {
        let mut log = ChannelLog::new(1);
        let mut renderer = PreviewRenderer::new(1, POINT_BUDGET);
        append(&mut log, 4, |_, s| (s % 2) as f64);
        let first = renderer.tick(&log).unwrap();
        assert!(first.bounds_changed);
        append(&mut log, 4, |_, s| (s % 2) as f64);
        let second = renderer.tick(&log).unwrap();
        assert!(!second.bounds_changed);
        assert_eq!(second.bounds, first.bounds);
    }

    #[test]
    fn decimation_keeps_newest_region_represented() {
        let mut log = ChannelLog::new(1);
        let mut renderer = PreviewRenderer::new(1, 100);
        append(&mut log, 1000, |_, s| s as f64);
        let frame = renderer.tick(&log).unwrap();
        assert!(frame.series[0].len() <= 100);
        // Stride sampling starts at the oldest sample and covers the log.
        let last_x = frame.series[0].last().unwrap()[0];
        let first_x = frame.series[0][0][0];
        assert!(last_x > first_x);
    }
}
