//! Reference clock reconstruction from the data stream.
//!
//! The clock register halves arrive inline as subheader 0x4 (low) and 0x5
//! (high) words, both on the live socket and in recorded streams, and are
//! stitched together here.

use crate::timing::QUADRANT_PERIOD;
use log::warn;

/// Outcome of feeding a high-half clock word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockUpdate {
    /// The combined value was taken as is.
    Adopted(u64),
    /// A forward jump beyond one quadrant was pulled back.
    ForwardJumpCorrected(u64),
    /// A backward jump beyond one quadrant was ignored; the value is unchanged.
    BackwardJumpIgnored(u64),
}

impl ClockUpdate {
    /// Clock value after the update.
    #[must_use]
    pub fn value(self) -> u64 {
        match self {
            ClockUpdate::Adopted(v)
            | ClockUpdate::ForwardJumpCorrected(v)
            | ClockUpdate::BackwardJumpIgnored(v) => v,
        }
    }

    /// True for either kind of discontinuity.
    #[must_use]
    pub fn is_discontinuity(self) -> bool {
        !matches!(self, ClockUpdate::Adopted(_))
    }
}

/// Stitches low/high clock halves and filters implausible jumps.
#[derive(Debug, Clone, Default)]
pub struct ReplayClock {
    current: u64,
    low: u64,
    discontinuities: u64,
}

impl ReplayClock {
    /// Creates a tracker with no clock seen yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value in 25 ns ticks (zero until the first update).
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Number of jumps corrected or ignored so far.
    #[must_use]
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    /// Stores the low half of the register.
    pub fn set_low(&mut self, low: u64) {
        self.low = low;
    }

    /// Combines `high` with the stored low half and updates the clock.
    pub fn set_high(&mut self, high: u64) -> ClockUpdate {
        let combined = high | self.low;
        let current = self.current;

        let update = if current > 0 && combined.saturating_add(QUADRANT_PERIOD) < current {
            warn!(
                "large backward clock jump {:.6} s -> {:.6} s ignored",
                ticks_to_seconds(current),
                ticks_to_seconds(combined)
            );
            ClockUpdate::BackwardJumpIgnored(current)
        } else if current > 0 && combined > current.saturating_add(QUADRANT_PERIOD) {
            let corrected = high.wrapping_sub(QUADRANT_PERIOD) | self.low;
            warn!(
                "large forward clock jump {:.6} s -> {:.6} s, using {:.6} s",
                ticks_to_seconds(current),
                ticks_to_seconds(combined),
                ticks_to_seconds(corrected)
            );
            self.current = corrected;
            ClockUpdate::ForwardJumpCorrected(corrected)
        } else {
            self.current = combined;
            ClockUpdate::Adopted(combined)
        };

        if update.is_discontinuity() {
            self.discontinuities += 1;
        }
        update
    }
}

#[allow(clippy::cast_precision_loss)]
fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 * 25e-9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(clock: &mut ReplayClock, value: u64) -> ClockUpdate {
        clock.set_low(value & 0xFFFF_FFFF);
        clock.set_high(value & 0xFFFF_0000_0000)
    }

    #[test]
    fn test_first_value_adopted() {
        let mut clock = ReplayClock::new();
        assert_eq!(feed(&mut clock, 0x1_0000_0042), ClockUpdate::Adopted(0x1_0000_0042));
        assert_eq!(clock.current(), 0x1_0000_0042);
    }

    #[test]
    fn test_small_steps_adopted() {
        let mut clock = ReplayClock::new();
        feed(&mut clock, 1_000);
        assert_eq!(feed(&mut clock, 900), ClockUpdate::Adopted(900));
        assert_eq!(feed(&mut clock, 900 + QUADRANT_PERIOD), ClockUpdate::Adopted(900 + QUADRANT_PERIOD));
        assert_eq!(clock.discontinuities(), 0);
    }

    #[test]
    fn test_backward_jump_ignored() {
        let mut clock = ReplayClock::new();
        feed(&mut clock, 0x5000_0000);
        let update = feed(&mut clock, 0x1000);
        assert_eq!(update, ClockUpdate::BackwardJumpIgnored(0x5000_0000));
        assert_eq!(clock.current(), 0x5000_0000);
        assert_eq!(clock.discontinuities(), 1);
    }

    #[test]
    fn test_forward_jump_corrected() {
        let mut clock = ReplayClock::new();
        feed(&mut clock, 0x1000);
        let update = feed(&mut clock, 0x1_0000_2000);
        let expected = 0x1_0000_0000u64.wrapping_sub(QUADRANT_PERIOD) | 0x2000;
        assert_eq!(update, ClockUpdate::ForwardJumpCorrected(expected));
        assert_eq!(clock.current(), expected);
        assert!(update.is_discontinuity());
    }
}
