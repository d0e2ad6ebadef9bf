//! Round trip histogram and distance estimation
//!
//! A single round trip is too noisy to be useful: its resolution is one tick
//! of a 16 MHz timer, which corresponds to more than nine meters. Many round
//! trips are collected into a histogram instead, and the distance is derived
//! from the histogram's weighted mean.

use serde::{Deserialize, Serialize};

use crate::{config::Calibration, config::NUM_BINS, time::Ticks};

/// Counts of round trips, by bin
///
/// Bin `i` counts the round trips that took `bin_offset_ticks + i` ticks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Histogram<const N: usize = NUM_BINS> {
    bins: [u32; N],
}

impl<const N: usize> Histogram<N> {
    /// Creates an empty histogram
    pub const fn new() -> Self {
        Histogram { bins: [0; N] }
    }

    /// Records a round trip
    ///
    /// Returns the bin that was incremented, or `None` if the round trip
    /// falls outside the histogram.
    pub fn record(&mut self, elapsed: Ticks, calibration: &Calibration) -> Option<usize> {
        let bin = elapsed.bin(calibration).filter(|&bin| bin < N)?;
        self.bins[bin] = self.bins[bin].saturating_add(1);
        Some(bin)
    }

    /// Resets every bin to zero
    pub fn clear(&mut self) {
        self.bins = [0; N];
    }

    /// Copies the histogram out and resets it
    pub fn take(&mut self) -> Self {
        let snapshot = *self;
        self.clear();
        snapshot
    }

    /// Returns the counts of all bins
    pub fn bins(&self) -> &[u32; N] {
        &self.bins
    }

    /// Returns the total number of samples
    pub fn total(&self) -> u32 {
        self.bins.iter().sum()
    }

    /// Returns `true`, if the histogram holds no samples
    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|&count| count == 0)
    }

    /// Returns the bin with the most samples
    ///
    /// Ties go to the lower bin. Returns `None` for an empty histogram.
    pub fn peak(&self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }

        let mut peak = 0;
        for (bin, &count) in self.bins.iter().enumerate() {
            if count > self.bins[peak] {
                peak = bin;
            }
        }

        Some(peak)
    }

    /// Returns the weighted mean, in one-based bins
    ///
    /// Bin `i` is weighted as `i + 1`. Returns `None` for an empty histogram.
    pub fn weighted_mean(&self) -> Option<f32> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let weighted: u64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(bin, &count)| count as u64 * (bin as u64 + 1))
            .sum();

        Some(weighted as f32 / total as f32)
    }

    /// Returns the standard deviation around the weighted mean, in bins
    ///
    /// A wide spread hints at multipath or a noisy link. Returns `None` for an
    /// empty histogram.
    pub fn spread(&self) -> Option<f32> {
        #[allow(unused_imports)]
        use micromath::F32Ext;

        let mean = self.weighted_mean()?;
        let total = self.total() as f32;

        let variance = self
            .bins
            .iter()
            .enumerate()
            .map(|(bin, &count)| {
                let deviation = (bin + 1) as f32 - mean;
                count as f32 * deviation * deviation
            })
            .sum::<f32>()
            / total;

        Some(variance.sqrt())
    }
}

impl<const N: usize> Default for Histogram<N> {
    fn default() -> Self {
        Histogram::new()
    }
}

/// Computes the distance to the peer from a histogram
///
/// The distance is `distance_scale_m * weighted_mean - distance_offset_m`.
/// A histogram without samples has no mean, which is reported as
/// [`DistanceError::NoSamples`].
///
/// # Example
///
/// ``` rust
/// use rtt_ranging::{
///     config::Calibration,
///     histogram::{distance_meters, DistanceError, Histogram},
///     time::Ticks,
/// };
///
/// let calibration = Calibration::default();
/// let mut histogram: Histogram = Histogram::new();
///
/// assert_eq!(
///     distance_meters(&histogram, &calibration),
///     Err(DistanceError::NoSamples),
/// );
///
/// histogram.record(Ticks::new(calibration.bin_offset_ticks + 9), &calibration);
/// let distance = distance_meters(&histogram, &calibration).unwrap();
///
/// // Bin 9 has a weight of 10
/// assert!((distance - (10.0 * 9.3685 - 69.96)).abs() < 1e-3);
/// ```
pub fn distance_meters<const N: usize>(
    histogram: &Histogram<N>,
    calibration: &Calibration,
) -> Result<f32, DistanceError> {
    let mean = histogram.weighted_mean().ok_or(DistanceError::NoSamples)?;
    Ok(calibration.distance_scale_m * mean - calibration.distance_offset_m)
}

/// Returned from [`distance_meters`], if no distance can be derived
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DistanceError {
    /// The histogram holds no samples
    NoSamples,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(bin: u32) -> Ticks {
        Ticks::new(Calibration::default().bin_offset_ticks + bin)
    }

    #[test]
    fn record_lands_in_offset_bin() {
        let calibration = Calibration::default();
        let mut histogram: Histogram = Histogram::new();

        assert_eq!(histogram.record(ticks(3), &calibration), Some(3));
        assert_eq!(histogram.record(ticks(3), &calibration), Some(3));
        assert_eq!(histogram.bins()[3], 2);
        assert_eq!(histogram.total(), 2);
    }

    #[test]
    fn out_of_range_is_discarded() {
        let calibration = Calibration::default();
        let mut histogram: Histogram<8> = Histogram::new();

        assert_eq!(histogram.record(ticks(8), &calibration), None);
        assert_eq!(histogram.record(Ticks::new(10), &calibration), None);
        assert_eq!(histogram.record(ticks(7), &calibration), Some(7));
        assert_eq!(histogram.total(), 1);
    }

    #[test]
    fn take_leaves_histogram_empty() {
        let calibration = Calibration::default();
        let mut histogram: Histogram = Histogram::new();
        histogram.record(ticks(1), &calibration);
        histogram.record(ticks(2), &calibration);

        let snapshot = histogram.take();

        assert_eq!(snapshot.total(), 2);
        assert_eq!(histogram.total(), 0);

        // Taking again is harmless
        assert!(histogram.take().is_empty());
        assert!(histogram.is_empty());
    }

    #[test]
    fn weighted_mean_is_one_based() {
        let calibration = Calibration::default();
        let mut histogram: Histogram = Histogram::new();
        histogram.record(ticks(0), &calibration);
        histogram.record(ticks(2), &calibration);

        // Weights 1 and 3
        assert_eq!(histogram.weighted_mean(), Some(2.0));
    }

    #[test]
    fn peak_and_spread() {
        let calibration = Calibration::default();
        let mut histogram: Histogram = Histogram::new();
        for _ in 0..3 {
            histogram.record(ticks(4), &calibration);
        }
        histogram.record(ticks(6), &calibration);
        histogram.record(ticks(2), &calibration);

        assert_eq!(histogram.peak(), Some(4));

        // Mean is 5, deviations are 0, 0, 0, 2, -2
        let spread = histogram.spread().unwrap();
        assert!((spread - (8.0f32 / 5.0).sqrt()).abs() < 1e-3);
    }

    #[test]
    fn empty_histogram_has_no_statistics() {
        let histogram: Histogram = Histogram::new();

        assert_eq!(histogram.peak(), None);
        assert_eq!(histogram.weighted_mean(), None);
        assert_eq!(histogram.spread(), None);
        assert_eq!(
            distance_meters(&histogram, &Calibration::default()),
            Err(DistanceError::NoSamples)
        );
    }

    #[test]
    fn distance_is_deterministic() {
        let calibration = Calibration::default();
        let mut histogram: Histogram = Histogram::new();
        histogram.record(ticks(10), &calibration);
        histogram.record(ticks(11), &calibration);

        let first = distance_meters(&histogram, &calibration);
        let second = distance_meters(&histogram.clone(), &calibration);

        assert_eq!(first, second);
        assert!(first.is_ok());
    }
}
