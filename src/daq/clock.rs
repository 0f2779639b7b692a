//! Reconstructs per-sample timestamps from a block's arrival time.
//!
//! The source delivers whole blocks, so only the arrival of the block is
//! observable. Assuming a steady capture rate, the newest sample carries the
//! arrival time and each earlier sample is back-dated by one sample period.

/// One timestamp (in ms) per sample index of a block that arrived at
/// `t_arrival_ms` and was captured at `rate_hz`.
///
/// A single-sample block (a serial line reading) gets the arrival time
/// unchanged.
pub fn block_timestamps(t_arrival_ms: f64, samples: usize, rate_hz: f64) -> Vec<f64> {
    if samples <= 1 {
        return vec![t_arrival_ms; samples];
    }
    let period_ms = 1000.0 / rate_hz;
    (0..samples)
        .map(|i| t_arrival_ms - (samples - 1 - i) as f64 * period_ms)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_dates_towards_arrival() {
        let ts = block_timestamps(100.0, 5, 1000.0);
        assert_eq!(ts.len(), 5);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*ts.last().unwrap(), 100.0);
        assert!((ts[0] - 96.0).abs() < 1e-9);
    }

    #[test]
    fn single_sample_is_arrival_time() {
        assert_eq!(block_timestamps(42.5, 1, 1000.0), vec![42.5]);
    }

    #[test]
    fn empty_block_yields_nothing() {
        assert!(block_timestamps(10.0, 0, 1000.0).is_empty());
    }

    #[test]
    fn deterministic_for_fixed_input() {
        assert_eq!(
            block_timestamps(500.0, 3, 250.0),
            block_timestamps(500.0, 3, 250.0)
        );
    }
}
