//! Round trip time measurement
//!
//! Two roles take part in a measurement:
//! 1. The [`Initiator`] sends a frame carrying a sequence number and waits
//!    for the response. The radio's address events start and latch a
//!    hardware timer, so the time between the frame leaving and the response
//!    arriving is measured without any software latency.
//! 2. The [`Responder`] listens, and answers every frame after a fixed
//!    turnaround time by echoing the sequence number back.
//!
//! Both run within an activation: a stretch of radio time that ends at a
//! hard deadline. The initiator sorts every valid round trip into a
//! [`Histogram`], and copies the histogram out at the end of each
//! activation. The distance is computed from that copy on request.
//!
//! Please note that the turnaround time of the responder and the radio
//! pipeline delays are part of every round trip. They are removed using the
//! [`Calibration`] values, which need to be determined for each pair of
//! devices.
//!
//! [`Histogram`]: crate::histogram::Histogram
//! [`Calibration`]: crate::config::Calibration

use embedded_hal::timer::CountDown;

use crate::{
    config::{RangingConfig, NUM_BINS},
    counters::LinkCounters,
    radio::{Radio, TimestampCapture},
    wait::Deadline,
};

pub use self::{initiator::*, responder::*};

mod initiator;
mod responder;

/// Size of the buffer frames are received into
pub const RX_BUFFER_LEN: usize = 32;

/// What an activation achieved
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Summary {
    /// Frames sent during the activation
    pub attempts: u32,
    /// Round trips that made it into the histogram
    ///
    /// Always zero for the responder.
    pub samples: u32,
}

/// Either role, so one context can be handed to the activation handler
pub enum Engine<const N: usize = NUM_BINS> {
    /// Drives the measurements
    Initiator(Initiator<N>),
    /// Echoes the initiator's frames
    Responder(Responder),
}

impl<const N: usize> Engine<N> {
    /// Runs one activation in whichever role this is
    ///
    /// The timestamp capture is only used by the initiator, but it is handed
    /// over either way, so both roles own the same hardware while they run.
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
        match self {
            Engine::Initiator(initiator) => initiator.run(radio, capture, deadline),
            Engine::Responder(responder) => responder.run(radio, deadline),
        }
    }

    /// Returns the measurement parameters of whichever role this is
    pub fn config(&self) -> &RangingConfig {
        match self {
            Engine::Initiator(initiator) => initiator.config(),
            Engine::Responder(responder) => responder.config(),
        }
    }

    /// How long one activation of this engine runs, at most
    pub fn activation_length_us(&self) -> u32 {
        self.config().activation_length_us
    }

    /// Returns the link counters of whichever role this is
    pub fn counters(&self) -> &LinkCounters {
        match self {
            Engine::Initiator(initiator) => initiator.counters(),
            Engine::Responder(responder) => responder.counters(),
        }
    }
}

/// An error that ends an activation early
///
/// Nothing that goes wrong with a single frame ends up here. Those problems
/// are counted in [`LinkCounters`] instead.
#[derive(Debug)]
pub enum Error<E> {
    /// The radio driver reported an error
    Radio(E),

    /// The response frame to send couldn't be written
    Frame(byte::Error),
}

impl<E> From<byte::Error> for Error<E> {
    fn from(error: byte::Error) -> Self {
        Error::Frame(error)
    }
}
