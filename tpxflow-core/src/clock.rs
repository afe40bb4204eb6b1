//! Reference clock shared between the control link and the decoders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to the externally maintained reference clock (25 ns ticks).
///
/// The control link (or the file-replay loop) publishes new values; samplers
/// take a snapshot per batch so decoders never read shared state. Clones
/// share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ReferenceClock {
    value: Arc<AtomicU64>,
}

impl ReferenceClock {
    /// Creates a clock holding `initial`.
    #[must_use]
    pub fn new(initial: u64) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(initial)),
        }
    }

    /// Publishes a new clock value.
    pub fn publish(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Reads the current value.
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_value() {
        let clock = ReferenceClock::new(5);
        let reader = clock.clone();
        assert_eq!(reader.snapshot(), 5);

        clock.publish(0x1000_0000);
        assert_eq!(reader.snapshot(), 0x1000_0000);
    }
}
