//! Link statistics
//!
//! Nothing that goes wrong in a single attempt interrupts the measurements.
//! Timeouts, corrupted frames and stale responses are counted here instead.
//! The counters persist across sessions, so they describe the link over its
//! whole lifetime.

use serde::{Deserialize, Serialize};

/// Counters describing the quality of the ranging link
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkCounters {
    /// Frames sent
    pub tx_count: u32,
    /// Frames received, whatever their CRC
    pub rx_count: u32,
    /// Frames received with a valid CRC
    pub rx_crc_ok: u32,
    /// Attempts that got no response in time
    pub rx_timeout: u32,
    /// Valid responses that didn't echo the last sequence number
    pub rx_ignored: u32,
    /// Set while the recent timeout rate is high
    ///
    /// Purely informational. Nothing in the measurements depends on it.
    pub high_error_flag: bool,
}

impl LinkCounters {
    /// Frames received with an invalid CRC
    pub fn rx_crc_error(&self) -> u32 {
        self.rx_count.saturating_sub(self.rx_crc_ok)
    }
}

/// Tracks the timeout rate over a sliding block of attempts
///
/// After every `window` attempts, the timeouts seen during that block are
/// compared against `threshold`, and the counting starts over.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ErrorRate {
    attempts: u32,
    timeouts: u32,
}

impl ErrorRate {
    pub(crate) fn record_timeout(&mut self) {
        self.timeouts = self.timeouts.saturating_add(1);
    }

    /// Counts an attempt, returning the new flag value at the end of a block
    pub(crate) fn record_attempt(&mut self, window: u32, threshold: u32) -> Option<bool> {
        self.attempts += 1;
        if self.attempts < window {
            return None;
        }

        let high = self.timeouts > threshold;
        *self = ErrorRate::default();

        Some(high)
    }
}
