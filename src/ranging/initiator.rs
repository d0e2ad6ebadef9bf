use core::num::Wrapping;

use embedded_hal::timer::CountDown;
use log::{debug, trace};

use super::{Error, Summary, RX_BUFFER_LEN};
use crate::{
    config::{Calibration, RadioConfig, RangingConfig, NUM_BINS},
    counters::{ErrorRate, LinkCounters},
    frame::{self, RangingFrame},
    histogram::{self, DistanceError, Histogram},
    radio::{Radio, TimestampCapture},
    time::Ticks,
    wait::{block_until, Deadline, TimeoutError},
};

/// The measuring end of a ranging link
///
/// Owns everything that the measurements produce: the working histogram, the
/// copy of the last activation's histogram, and the link counters. Radio and
/// capture hardware are only borrowed for the duration of an activation.
///
/// # Example
///
/// ``` rust
/// use rtt_ranging::{
///     config::{Calibration, RadioConfig, RangingConfig},
///     ranging::Initiator,
///     sim::{Peer, SimCapture, SimCountDown, SimRadio, SimTriggerPath},
///     wait::Deadline,
/// };
///
/// let mut initiator: Initiator = Initiator::new(
///     RadioConfig::default(),
///     RangingConfig::default(),
///     Calibration::default(),
/// );
///
/// let path = SimTriggerPath::new();
/// let mut radio = SimRadio::new(&path, Peer::Echo { delay_ticks: 4150 + 20 });
/// let mut capture = SimCapture::new(&path);
/// let mut deadline = Deadline::start(SimCountDown::default(), 3 * 10 + 1u32);
///
/// let summary = initiator.run(&mut radio, &mut capture, &mut deadline).unwrap();
///
/// assert_eq!(summary.attempts, 10);
/// assert_eq!(initiator.last_histogram().bins()[20], 10);
/// assert!(initiator.distance_meters().is_ok());
/// ```
pub struct Initiator<const N: usize = NUM_BINS> {
    radio_config: RadioConfig,
    config: RangingConfig,
    calibration: Calibration,
    counters: LinkCounters,
    error_rate: ErrorRate,
    histogram: Histogram<N>,
    last_histogram: Histogram<N>,
    sequence: Wrapping<u16>,
    tx_frame: RangingFrame,
    rx_buffer: [u8; RX_BUFFER_LEN],
}

/// A single attempt, as seen by the initiator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Measurement {
    /// The sequence number that was sent
    pub sequence: Wrapping<u16>,
    /// The sequence number of the response, if it had one
    pub echoed: Option<u16>,
    /// The round trip captured in hardware
    pub elapsed: Ticks,
    /// Whether the response's CRC was valid
    pub crc_ok: bool,
    /// Whether no response arrived in time
    pub timed_out: bool,
}

impl Measurement {
    fn timed_out(sequence: Wrapping<u16>) -> Self {
        Measurement {
            sequence,
            echoed: None,
            elapsed: Ticks::default(),
            crc_ok: false,
            timed_out: true,
        }
    }
}

/// What became of a [`Measurement`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The round trip was added to this histogram bin
    Binned(usize),
    /// The round trip was valid, but outside the histogram
    OutOfRange,
    /// The response was for a different frame
    Ignored,
    /// The response was corrupted
    CrcError,
    /// No response arrived
    TimedOut,
}

impl<const N: usize> Initiator<N> {
    /// Creates a new instance of `Initiator`
    pub fn new(radio_config: RadioConfig, config: RangingConfig, calibration: Calibration) -> Self {
        Initiator {
            radio_config,
            config,
            calibration,
            counters: LinkCounters::default(),
            error_rate: ErrorRate::default(),
            histogram: Histogram::new(),
            last_histogram: Histogram::new(),
            sequence: Wrapping(1),
            tx_frame: RangingFrame::default(),
            rx_buffer: [0; RX_BUFFER_LEN],
        }
    }

    /// Runs one activation
    ///
    /// Configures the radio, binds the capture to it, and keeps measuring
    /// until the deadline expires. Afterwards the radio is released, the
    /// capture unbound, and the histogram copied to
    /// [`Initiator::last_histogram`].
    ///
    /// Only errors reported by the radio driver itself end the activation
    /// early. Even then, the hardware is released and the histogram is
    /// copied out.
    pub fn run<R, C, T>(
        &mut self,
        radio: &mut R,
        capture: &mut C,
        deadline: &mut Deadline<T>,
    ) -> Result<Summary, Error<R::Error>>
    where
        R: Radio,
        C: TimestampCapture,
        T: CountDown,
    {
        debug!("initiator: activation begins");

        self.histogram.clear();

        let result = match radio.configure(&self.radio_config) {
            Ok(()) => {
                capture.bind();
                self.measure(radio, capture, deadline)
            }
            Err(error) => Err(Error::Radio(error)),
        };

        let released = radio.release();
        capture.unbind();
        self.last_histogram = self.histogram.take();

        let summary = result?;
        released.map_err(Error::Radio)?;

        debug!(
            "initiator: activation ends after {} attempts, {} samples",
            summary.attempts, summary.samples,
        );

        Ok(summary)
    }

    fn measure<R, C, T>(
        &mut self,
        radio: &mut R,
        capture: &mut C,
        deadline: &mut Deadline<T>,
    ) -> Result<Summary, Error<R::Error>>
    where
        R: Radio,
        C: TimestampCapture,
        T: CountDown,
    {
        let mut summary = Summary::default();

        while !deadline.expired() {
            // The responder answers corrupted frames with the marker, so it's
            // never sent.
            if self.sequence.0 == frame::ERROR_MARKER {
                self.sequence += Wrapping(1);
            }
            let sequence = self.sequence;
            self.sequence += Wrapping(1);
            self.tx_frame.set_sequence(sequence.0);

            capture.reset();
            radio
                .start_transmit(self.tx_frame.as_bytes())
                .map_err(Error::Radio)?;
            match block_until(deadline, None, || radio.wait_transmit()) {
                Ok(()) => (),
                // The frame didn't make it out completely. It doesn't count
                // as an attempt.
                Err(TimeoutError::Deadline) | Err(TimeoutError::Timeout) => break,
                Err(TimeoutError::Other(error)) => return Err(Error::Radio(error)),
            }

            self.counters.tx_count = self.counters.tx_count.wrapping_add(1);
            summary.attempts += 1;
            if let Some(high) = self
                .error_rate
                .record_attempt(self.config.error_window, self.config.error_threshold)
            {
                self.counters.high_error_flag = high;
            }

            radio.start_receive().map_err(Error::Radio)?;
            let rx_buffer = &mut self.rx_buffer;
            let received = block_until(deadline, Some(self.config.response_poll_limit), || {
                radio.wait_receive(rx_buffer)
            });

            let measurement = match received {
                Ok(status) => Measurement {
                    sequence,
                    echoed: self
                        .rx_buffer
                        .get(..status.len)
                        .and_then(|received| frame::read_sequence(received).ok()),
                    elapsed: capture.captured(),
                    crc_ok: status.crc_ok,
                    timed_out: false,
                },
                Err(TimeoutError::Deadline) | Err(TimeoutError::Timeout) => {
                    Measurement::timed_out(sequence)
                }
                Err(TimeoutError::Other(error)) => return Err(Error::Radio(error)),
            };

            let outcome = self.process(&measurement);
            trace!("initiator: {:?} -> {:?}", measurement, outcome);
            if let Outcome::Binned(_) = outcome {
                summary.samples += 1;
            }

            radio.disable().map_err(Error::Radio)?;
        }

        Ok(summary)
    }

    /// Accounts for a single attempt
    ///
    /// Only a response with a valid CRC, a matching sequence number and a
    /// round trip within the histogram ends up in the histogram. Every other
    /// outcome only shows up in the counters.
    pub fn process(&mut self, measurement: &Measurement) -> Outcome {
        if measurement.timed_out {
            self.counters.rx_timeout = self.counters.rx_timeout.wrapping_add(1);
            self.error_rate.record_timeout();
            return Outcome::TimedOut;
        }

        self.counters.rx_count = self.counters.rx_count.wrapping_add(1);
        if !measurement.crc_ok {
            return Outcome::CrcError;
        }
        self.counters.rx_crc_ok = self.counters.rx_crc_ok.wrapping_add(1);

        match measurement.echoed {
            Some(echoed) if frame::sequence_matches(measurement.sequence, echoed) => (),
            _ => {
                self.counters.rx_ignored = self.counters.rx_ignored.wrapping_add(1);
                return Outcome::Ignored;
            }
        }

        match self.histogram.record(measurement.elapsed, &self.calibration) {
            Some(bin) => Outcome::Binned(bin),
            None => Outcome::OutOfRange,
        }
    }

    /// Computes the distance from the last activation's histogram
    pub fn distance_meters(&self) -> Result<f32, DistanceError> {
        histogram::distance_meters(&self.last_histogram, &self.calibration)
    }

    /// Returns the histogram of the last completed activation
    pub fn last_histogram(&self) -> &Histogram<N> {
        &self.last_histogram
    }

    /// Returns the histogram that is being filled right now
    pub fn histogram(&self) -> &Histogram<N> {
        &self.histogram
    }

    /// Returns the link counters
    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    /// Returns the measurement parameters
    pub fn config(&self) -> &RangingConfig {
        &self.config
    }

    /// Returns the calibration in use
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Replaces the calibration
    ///
    /// Takes effect with the next recorded round trip and the next distance
    /// computation.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    /// Returns the sequence number the next frame will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence.0
    }

    /// Sets the sequence number the next frame will carry
    ///
    /// The error marker is skipped, so setting it means the frame after it.
    pub fn set_next_sequence(&mut self, sequence: u16) {
        self.sequence = Wrapping(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Inbound, Peer, SimCapture, SimCountDown, SimRadio, SimTriggerPath};

    const DELAY_BIN: u32 = 25;

    fn initiator() -> Initiator {
        Initiator::new(
            RadioConfig::default(),
            RangingConfig::default(),
            Calibration::default(),
        )
    }

    fn delay() -> u32 {
        Calibration::default().bin_offset_ticks + DELAY_BIN
    }

    // With a peer that answers immediately, every attempt polls the deadline
    // three times: at the top of the loop, while sending and while receiving.
    fn deadline_after(attempts: u32) -> Deadline<'static, SimCountDown> {
        Deadline::start(SimCountDown::default(), 3 * attempts + 1)
    }

    fn measurement(sequence: u16) -> Measurement {
        Measurement {
            sequence: Wrapping(sequence),
            echoed: Some(sequence),
            elapsed: Ticks::new(delay()),
            crc_ok: true,
            timed_out: false,
        }
    }

    #[test]
    fn echoing_peer_fills_one_bin() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::Echo { delay_ticks: delay() });
        let mut capture = SimCapture::new(&path);

        let summary = initiator
            .run(&mut radio, &mut capture, &mut deadline_after(40))
            .unwrap();

        let counters = initiator.counters();
        assert_eq!(summary.attempts, 40);
        assert_eq!(summary.samples, 40);
        assert_eq!(counters.tx_count, 40);
        assert_eq!(counters.rx_ignored, 0);
        assert_eq!(counters.rx_timeout, 0);
        assert_eq!(initiator.last_histogram().bins()[DELAY_BIN as usize], 40);
        assert_eq!(initiator.last_histogram().total(), 40);
        assert!(initiator.histogram().is_empty());
        assert!(!capture.is_bound());
        assert!(radio.is_released());
    }

    #[test]
    fn silent_peer_only_times_out() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::Silent);
        let mut capture = SimCapture::new(&path);
        let mut deadline = Deadline::start(SimCountDown::default(), 50_000u32);

        let summary = initiator.run(&mut radio, &mut capture, &mut deadline).unwrap();

        let counters = initiator.counters();
        assert!(summary.attempts > 0);
        assert_eq!(counters.rx_timeout, counters.tx_count);
        assert_eq!(counters.rx_count, 0);
        assert!(initiator.last_histogram().is_empty());
        assert_eq!(initiator.distance_meters(), Err(DistanceError::NoSamples));
    }

    #[test]
    fn corrupted_responses_are_not_binned() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::CorruptCrc { delay_ticks: delay() });
        let mut capture = SimCapture::new(&path);

        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(10))
            .unwrap();

        let counters = initiator.counters();
        assert_eq!(counters.rx_count, 10);
        assert_eq!(counters.rx_crc_ok, 0);
        assert_eq!(counters.rx_crc_error(), 10);
        assert!(initiator.last_histogram().is_empty());
    }

    #[test]
    fn stale_responses_are_ignored() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::StaleSequence { delay_ticks: delay() });
        let mut capture = SimCapture::new(&path);

        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(10))
            .unwrap();

        let counters = initiator.counters();
        assert_eq!(counters.rx_crc_ok, 10);
        assert_eq!(counters.rx_ignored, 10);
        assert!(initiator.last_histogram().is_empty());
    }

    #[test]
    fn histogram_is_cleared_on_begin() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut capture = SimCapture::new(&path);

        let mut radio = SimRadio::new(&path, Peer::Echo { delay_ticks: delay() });
        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(5))
            .unwrap();
        assert_eq!(initiator.last_histogram().total(), 5);

        let mut radio = SimRadio::new(&path, Peer::Silent);
        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(1))
            .unwrap();
        assert!(initiator.last_histogram().is_empty());

        // Counters persist across activations
        assert_eq!(initiator.counters().rx_crc_ok, 5);
    }

    #[test]
    fn sequence_wraps_past_error_marker() {
        let mut initiator = initiator();
        initiator.set_next_sequence(0xFFFF);
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::Echo { delay_ticks: delay() });
        let mut capture = SimCapture::new(&path);

        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(3))
            .unwrap();

        assert_eq!(radio.sent_sequences(), &[0xFFFF, 0x0001, 0x0002]);
        assert_eq!(initiator.counters().rx_ignored, 0);
        assert_eq!(initiator.last_histogram().total(), 3);
    }

    #[test]
    fn error_marker_is_never_sent() {
        let mut initiator = initiator();
        initiator.set_next_sequence(frame::ERROR_MARKER);
        let path = SimTriggerPath::new();
        // Every answer is the marker, as if each frame had arrived corrupted
        let script = [Inbound::Frame(frame::ERROR_MARKER); 4];
        let mut radio = SimRadio::new(&path, Peer::Scripted(&script));
        let mut capture = SimCapture::new(&path);

        initiator
            .run(&mut radio, &mut capture, &mut deadline_after(2))
            .unwrap();

        assert_eq!(radio.sent_sequences(), &[0x0001, 0x0002]);
        assert_eq!(initiator.counters().rx_ignored, 2);
        assert!(initiator.last_histogram().is_empty());
    }

    #[test]
    fn every_outcome_but_binned_leaves_histogram_alone() {
        let mut initiator = initiator();

        assert_eq!(
            initiator.process(&measurement(7)),
            Outcome::Binned(DELAY_BIN as usize)
        );
        assert_eq!(
            initiator.process(&Measurement::timed_out(Wrapping(8))),
            Outcome::TimedOut
        );
        assert_eq!(
            initiator.process(&Measurement { crc_ok: false, ..measurement(9) }),
            Outcome::CrcError
        );
        assert_eq!(
            initiator.process(&Measurement { echoed: Some(3), ..measurement(10) }),
            Outcome::Ignored
        );
        assert_eq!(
            initiator.process(&Measurement { echoed: None, ..measurement(11) }),
            Outcome::Ignored
        );
        assert_eq!(
            initiator.process(&Measurement {
                elapsed: Ticks::new(delay() + NUM_BINS as u32),
                ..measurement(12)
            }),
            Outcome::OutOfRange
        );
        assert_eq!(
            initiator.process(&Measurement { elapsed: Ticks::new(5), ..measurement(13) }),
            Outcome::OutOfRange
        );

        assert_eq!(initiator.histogram().total(), 1);

        let counters = initiator.counters();
        assert_eq!(counters.rx_timeout, 1);
        assert_eq!(counters.rx_count, 6);
        assert_eq!(counters.rx_crc_ok, 5);
        assert_eq!(counters.rx_ignored, 2);
    }

    #[test]
    fn high_error_rate_is_flagged() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::Silent);
        let mut capture = SimCapture::new(&path);
        let mut deadline = Deadline::start(SimCountDown::default(), 1_000_000u32);

        initiator.run(&mut radio, &mut capture, &mut deadline).unwrap();

        assert!(initiator.counters().tx_count >= 50);
        assert!(initiator.counters().high_error_flag);
    }

    #[test]
    fn radio_failure_still_releases_hardware() {
        let mut initiator = initiator();
        let path = SimTriggerPath::new();
        let mut radio = SimRadio::new(&path, Peer::Echo { delay_ticks: delay() });
        radio.fail_after_transmits(2);
        let mut capture = SimCapture::new(&path);

        let result = initiator.run(&mut radio, &mut capture, &mut deadline_after(10));

        assert!(matches!(result, Err(Error::Radio(_))));
        assert!(radio.is_released());
        assert!(!capture.is_bound());
        assert_eq!(initiator.last_histogram().total(), 2);
    }
}
