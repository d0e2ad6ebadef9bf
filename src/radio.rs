//! Hardware seams of the ranging engine
//!
//! The engine doesn't touch any registers itself. It drives a [`Radio`] that
//! sends and receives frames, and a [`TimestampCapture`] that measures round
//! trips in hardware. The `nrf52-rtt` crate implements both on the nRF52's
//! RADIO, TIMER and PPI peripherals; [`crate::sim`] implements them for
//! tests.
//!
//! Operations that take a while to complete follow the `nb` convention:
//! `Err(nb::Error::WouldBlock)` means "not yet, ask again".

use crate::{config::RadioConfig, time::Ticks};

/// A radio that can exchange ranging frames
pub trait Radio {
    /// An error reported by the radio hardware or its driver
    type Error;

    /// Powers the radio up and applies the configuration
    fn configure(&mut self, config: &RadioConfig) -> Result<(), Self::Error>;

    /// Starts transmitting a frame
    ///
    /// If the automatic turnaround is enabled and a frame was just received,
    /// the transmitter is already ramping up. In that case this only hands
    /// over the frame to send.
    fn start_transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Waits for a transmission to finish
    fn wait_transmit(&mut self) -> nb::Result<(), Self::Error>;

    /// Switches to receive mode
    fn start_receive(&mut self) -> Result<(), Self::Error>;

    /// Waits for a frame to arrive
    ///
    /// Copies the frame into `buffer` and reports whether its CRC was valid.
    /// Frames with an invalid CRC are still returned. Whether they count for
    /// anything is up to the caller.
    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<RxStatus, Self::Error>;

    /// Enables or disables the automatic receive-to-transmit turnaround
    ///
    /// While enabled, the radio starts ramping up its transmitter as soon as
    /// a reception completes, without waiting for software. This keeps the
    /// inter frame spacing fixed, which the initiator's calibration relies
    /// on.
    fn set_turnaround(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Aborts whatever the radio is doing and returns it to the disabled state
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Disables the radio, clears all of its shortcuts and interrupts, and
    /// powers it down
    fn release(&mut self) -> Result<(), Self::Error>;
}

/// The outcome of a reception
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStatus {
    /// Whether the frame's CRC was valid
    pub crc_ok: bool,

    /// How many bytes were copied into the buffer
    pub len: usize,
}

/// Measures round trips with zero software latency
///
/// Once bound, the radio's address event starts the capture timer when a
/// frame goes out, and latches the timer when the response's address comes
/// in. The elapsed ticks don't depend on interrupt latency or on how quickly
/// the measurement loop runs.
pub trait TimestampCapture {
    /// Connects the radio's address event to the timer's start and capture
    /// tasks
    fn bind(&mut self);

    /// Disconnects the radio from the timer
    fn unbind(&mut self);

    /// Stops and clears the timer, ready for the next transmission
    fn reset(&mut self);

    /// Stops the timer and returns the ticks latched by the last capture
    fn captured(&mut self) -> Ticks;
}
