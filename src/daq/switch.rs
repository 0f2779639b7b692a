use log::debug;

use crate::daq::error::DaqError;

/// Number of digital output lines driven as one port.
pub const DIGITAL_LINE_COUNT: usize = 4;

/// Destination for whole-vector digital level writes.
pub trait DigitalSink: Send {
    fn write_levels(&mut self, levels: &[bool]) -> Result<(), DaqError>;
}

/// Current asserted state of the output lines plus the two tracked line
/// indices. The vector is always written as a whole, never line by line.
pub struct DigitalLevels {
    levels: Vec<bool>,
    default_line: usize,
    switch_line: usize,
}

impl DigitalLevels {
    /// Start state: the default line high, every other line low.
    pub fn new(line_count: usize, default_line: usize, switch_line: usize) -> Self {
        let levels = (0..line_count).map(|i| i == default_line).collect();
        Self {
            levels,
            default_line,
            switch_line,
        }
    }

    /// Flips both tracked lines; the rest of the vector is untouched.
    pub fn toggle(&mut self) {
        self.levels[self.default_line] = !self.levels[self.default_line];
        self.levels[self.switch_line] = !self.levels[self.switch_line];
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.levels
    }
}

/// Stand-in for the hardware digital writer; logs each vector it is handed.
pub struct LogDigitalSink;

impl DigitalSink for LogDigitalSink {
    fn write_levels(&mut self, levels: &[bool]) -> Result<(), DaqError> {
        debug!("digital levels -> {levels:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_state_asserts_only_the_default_line() {
        let levels = DigitalLevels::new(DIGITAL_LINE_COUNT, 0, 1);
        assert_eq!(levels.as_slice(), &[true, false, false, false]);
    }

    #[test]
    fn toggle_flips_both_tracked_lines() {
        let mut levels = DigitalLevels::new(DIGITAL_LINE_COUNT, 0, 1);
        levels.toggle();
        assert_eq!(levels.as_slice(), &[false, true, false, false]);
        levels.toggle();
        assert_eq!(levels.as_slice(), &[true, false, false, false]);
    }

    #[test]
    fn untracked_lines_stay_low() {
        let mut levels = DigitalLevels::new(DIGITAL_LINE_COUNT, 2, 3);
        levels.toggle();
        assert_eq!(levels.as_slice(), &[false, false, false, true]);
    }
}
