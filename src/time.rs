//! Time-related types based on the capture timer

use core::ops::Sub;

use serde::{Deserialize, Serialize};

use crate::config::{Calibration, TICK_HZ};

/// A number of capture timer ticks
///
/// One tick is 1/16 µs. Round trips are measured in these units, from the
/// moment the initiator's address goes out until the responder's address
/// comes back.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct Ticks(u32);

impl Ticks {
    /// Creates a new instance of `Ticks`
    pub const fn new(value: u32) -> Self {
        Ticks(value)
    }

    /// Returns the raw tick count
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the tick count in nanoseconds
    ///
    /// # Example
    ///
    /// ``` rust
    /// use rtt_ranging::time::Ticks;
    ///
    /// assert_eq!(Ticks::new(16).as_nanos(), 1_000);
    /// assert_eq!(Ticks::new(1).as_nanos(), 62);
    /// ```
    pub fn as_nanos(&self) -> u64 {
        self.0 as u64 * 1_000_000_000 / TICK_HZ as u64
    }

    /// Returns the histogram bin these ticks fall into
    ///
    /// Subtracts the calibrated turnaround offset. Returns `None`, if the
    /// round trip was shorter than the offset, which means the response can't
    /// have been a genuine echo.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use rtt_ranging::{config::Calibration, time::Ticks};
    ///
    /// let calibration = Calibration::default();
    ///
    /// assert_eq!(Ticks::new(4150 + 7).bin(&calibration), Some(7));
    /// assert_eq!(Ticks::new(4000).bin(&calibration), None);
    /// ```
    pub fn bin(&self, calibration: &Calibration) -> Option<usize> {
        self.0
            .checked_sub(calibration.bin_offset_ticks)
            .map(|bin| bin as usize)
    }

    /// Returns the amount of ticks passed between two captures
    ///
    /// The capture timer is 32 bits wide and wraps around, so this assumes
    /// that `self` was captured after `earlier`.
    pub fn duration_since(&self, earlier: Ticks) -> Ticks {
        Ticks(self.0.wrapping_sub(earlier.0))
    }
}

impl Sub for Ticks {
    type Output = Ticks;

    fn sub(self, rhs: Ticks) -> Self::Output {
        self.duration_since(rhs)
    }
}

impl From<u32> for Ticks {
    fn from(value: u32) -> Self {
        Ticks(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_across_wraparound() {
        let earlier = Ticks::new(u32::MAX - 9);
        let later = Ticks::new(40);

        assert_eq!(later.duration_since(earlier), Ticks::new(50));
        assert_eq!(later - earlier, Ticks::new(50));
    }

    #[test]
    fn bin_at_offset_is_zero() {
        let calibration = Calibration::default();

        assert_eq!(Ticks::new(calibration.bin_offset_ticks).bin(&calibration), Some(0));
        assert_eq!(Ticks::new(calibration.bin_offset_ticks - 1).bin(&calibration), None);
    }
}
