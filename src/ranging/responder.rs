use embedded_hal::timer::CountDown;
use log::{debug, trace};

use super::{Error, Summary, RX_BUFFER_LEN};
use crate::{
    config::{RadioConfig, RangingConfig},
    counters::LinkCounters,
    frame::{self, RangingFrame},
    radio::Radio,
    wait::{block_until, Deadline, TimeoutError},
};

/// The echoing end of a ranging link
///
/// Listens for the initiator's frames and answers each one through the
/// radio's automatic turnaround. The response goes out a fixed inter frame
/// spacing after the request ended, regardless of what the software is doing,
/// so the turnaround time is constant and can be calibrated out.
pub struct Responder {
    radio_config: RadioConfig,
    config: RangingConfig,
    counters: LinkCounters,
    response: RangingFrame,
    rx_buffer: [u8; RX_BUFFER_LEN],
}

impl Responder {
    /// Creates a new instance of `Responder`
    pub fn new(radio_config: RadioConfig, config: RangingConfig) -> Self {
        Responder {
            radio_config,
            config,
            counters: LinkCounters::default(),
            response: RangingFrame::default(),
            rx_buffer: [0; RX_BUFFER_LEN],
        }
    }

    /// Runs one activation
    ///
    /// Answers frames until the deadline expires. The only bound on waiting
    /// for a frame is the deadline, since the responder has no idea when the
    /// initiator is going to send.
    pub fn run<R, T>(
        &mut self,
        radio: &mut R,
        deadline: &mut Deadline<T>,
    ) -> Result<Summary, Error<R::Error>>
    where
        R: Radio,
        T: CountDown,
    {
        debug!("responder: activation begins");

        let result = match radio.configure(&self.radio_config) {
            Ok(()) => self.answer(radio, deadline),
            Err(error) => Err(Error::Radio(error)),
        };

        // The turnaround must not outlive the activation. The BLE stack gets
        // the radio back next, and it doesn't expect any shortcuts.
        let released = radio
            .set_turnaround(false)
            .and_then(|()| radio.release());

        let summary = result?;
        released.map_err(Error::Radio)?;

        debug!("responder: activation ends after {} responses", summary.attempts);

        Ok(summary)
    }

    fn answer<R, T>(
        &mut self,
        radio: &mut R,
        deadline: &mut Deadline<T>,
    ) -> Result<Summary, Error<R::Error>>
    where
        R: Radio,
        T: CountDown,
    {
        let mut summary = Summary::default();

        while !deadline.expired() {
            radio.set_turnaround(true).map_err(Error::Radio)?;
            radio.start_receive().map_err(Error::Radio)?;

            let rx_buffer = &mut self.rx_buffer;
            let status = match block_until(deadline, None, || radio.wait_receive(rx_buffer)) {
                Ok(status) => status,
                Err(TimeoutError::Deadline) | Err(TimeoutError::Timeout) => break,
                Err(TimeoutError::Other(error)) => return Err(Error::Radio(error)),
            };
            self.counters.rx_count = self.counters.rx_count.wrapping_add(1);

            // The transmitter is already ramping up at this point. The
            // response has to be in place before it's done.
            let received = self.rx_buffer.get(..status.len).unwrap_or(&[]);
            if status.crc_ok {
                self.counters.rx_crc_ok = self.counters.rx_crc_ok.wrapping_add(1);
            }
            let echoed =
                status.crc_ok && frame::echo_sequence(received, self.response.as_mut_bytes()).is_ok();
            if !echoed {
                frame::mark_error(self.response.as_mut_bytes())?;
            }
            trace!("responder: answering with {}", self.response.sequence());

            radio
                .start_transmit(self.response.as_bytes())
                .map_err(Error::Radio)?;
            radio.set_turnaround(false).map_err(Error::Radio)?;

            match block_until(deadline, None, || radio.wait_transmit()) {
                Ok(()) => (),
                Err(TimeoutError::Deadline) | Err(TimeoutError::Timeout) => break,
                Err(TimeoutError::Other(error)) => return Err(Error::Radio(error)),
            }
            self.counters.tx_count = self.counters.tx_count.wrapping_add(1);
            summary.attempts += 1;

            radio.disable().map_err(Error::Radio)?;
        }

        Ok(summary)
    }

    /// Returns the link counters
    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    /// Returns the measurement parameters
    ///
    /// The responder doesn't measure, but its activations are bounded the
    /// same way as the initiator's.
    pub fn config(&self) -> &RangingConfig {
        &self.config
    }
}
