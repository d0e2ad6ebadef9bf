//! Simulated adapters
//!
//! Stand-ins for the hardware seams, so the scheduler and both ranging roles
//! can run on a host. The simulation is driven entirely by polling: nothing
//! in here ever sleeps, and every countdown expires after a fixed number of
//! polls rather than after some amount of time.

use core::cell::Cell;

use embedded_hal::timer::CountDown;
use void::Void;

use crate::{
    config::RadioConfig,
    dispatch::Dispatcher,
    frame::{self, RangingFrame, FRAME_LEN},
    radio::{Radio, RxStatus, TimestampCapture},
    time::Ticks,
    timeslot::{ArbitrationService, SliceDeadline, SliceRequest, SliceTimer},
};

/// How many sent frames [`SimRadio`] and requests [`SimArbiter`] remember
pub const HISTORY_LEN: usize = 64;

/// A countdown that expires after a number of polls
///
/// `wait` reports the expiry once, then restarts with the same count, the way
/// a periodic hardware timer would.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimCountDown {
    period: u32,
    remaining: u32,
}

impl CountDown for SimCountDown {
    type Time = u32;

    fn start<T>(&mut self, count: T)
    where
        T: Into<Self::Time>,
    {
        self.period = count.into();
        self.remaining = self.period;
    }

    fn wait(&mut self) -> nb::Result<(), Void> {
        if self.remaining <= 1 {
            self.remaining = self.period;
            return Ok(());
        }

        self.remaining -= 1;
        Err(nb::Error::WouldBlock)
    }
}

/// The connection between [`SimRadio`] and [`SimCapture`]
///
/// Plays the part of the PPI channels: while bound, a response arriving at
/// the radio latches its delay into the capture.
#[derive(Debug, Default)]
pub struct SimTriggerPath {
    bound: Cell<bool>,
    latched: Cell<u32>,
}

impl SimTriggerPath {
    /// Creates an unbound trigger path
    pub const fn new() -> Self {
        SimTriggerPath {
            bound: Cell::new(false),
            latched: Cell::new(0),
        }
    }

    fn latch(&self, ticks: u32) {
        if self.bound.get() {
            self.latched.set(ticks);
        }
    }
}

/// How the simulated peer of a [`SimRadio`] behaves
#[derive(Clone, Copy, Debug)]
pub enum Peer<'a> {
    /// Echoes every frame after a fixed round trip
    Echo {
        /// Round trip of every response
        delay_ticks: u32,
    },

    /// Never answers
    Silent,

    /// Answers every frame, but the CRC of every answer is broken
    CorruptCrc {
        /// Round trip of every response
        delay_ticks: u32,
    },

    /// Answers every frame with the sequence number of the frame before
    StaleSequence {
        /// Round trip of every response
        delay_ticks: u32,
    },

    /// Sends these frames to a listening radio, one per reception
    Scripted(&'a [Inbound]),
}

/// A frame sent by a [`Peer::Scripted`] peer
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Inbound {
    /// An intact frame with this sequence number
    Frame(u16),
    /// A frame with this sequence number and a broken CRC
    Corrupted(u16),
    /// A frame too short to carry a sequence number
    Truncated,
}

#[derive(Clone, Copy, Debug)]
struct Reply {
    sequence: u16,
    crc_ok: bool,
    delay_ticks: u32,
}

/// An error injected into [`SimRadio`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimError {
    /// Injected through [`SimRadio::fail_after_transmits`]
    Injected,
}

/// A radio talking to a simulated peer
///
/// Records the sequence number of every frame it sends.
#[derive(Debug)]
pub struct SimRadio<'a> {
    path: &'a SimTriggerPath,
    peer: Peer<'a>,
    script_position: usize,
    reply: Option<Reply>,
    sent: [u16; HISTORY_LEN],
    sent_len: usize,
    transmits: u32,
    fail_after: Option<u32>,
    config: Option<RadioConfig>,
    turnaround: bool,
    released: bool,
    receptions: u32,
    end_after: Option<(u32, &'a Dispatcher)>,
}

impl<'a> SimRadio<'a> {
    /// Creates a radio whose responses travel through the given trigger path
    pub fn new(path: &'a SimTriggerPath, peer: Peer<'a>) -> Self {
        SimRadio {
            path,
            peer,
            script_position: 0,
            reply: None,
            sent: [0; HISTORY_LEN],
            sent_len: 0,
            transmits: 0,
            fail_after: None,
            config: None,
            turnaround: false,
            released: false,
            receptions: 0,
            end_after: None,
        }
    }

    /// Raises End on `dispatcher` once `receptions` frames were received
    ///
    /// The way the arbiter takes the window away in the middle of an
    /// activation.
    pub fn trigger_end_after(&mut self, receptions: u32, dispatcher: &'a Dispatcher) {
        self.end_after = Some((receptions, dispatcher));
    }

    /// How many frames were received so far
    pub fn receptions(&self) -> u32 {
        self.receptions
    }

    /// Makes every transmission after the first `transmits` fail
    pub fn fail_after_transmits(&mut self, transmits: u32) {
        self.fail_after = Some(transmits);
    }

    /// Sequence numbers of the frames sent so far
    ///
    /// Only the first [`HISTORY_LEN`] are kept.
    pub fn sent_sequences(&self) -> &[u16] {
        &self.sent[..self.sent_len]
    }

    /// The configuration last applied
    pub fn config(&self) -> Option<&RadioConfig> {
        self.config.as_ref()
    }

    /// Whether the automatic turnaround is enabled
    pub fn turnaround_enabled(&self) -> bool {
        self.turnaround
    }

    /// Whether the radio was released since it was last configured
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn reply_to(&self, sequence: u16) -> Option<Reply> {
        match self.peer {
            Peer::Echo { delay_ticks } => Some(Reply {
                sequence,
                crc_ok: true,
                delay_ticks,
            }),
            Peer::CorruptCrc { delay_ticks } => Some(Reply {
                sequence,
                crc_ok: false,
                delay_ticks,
            }),
            Peer::StaleSequence { delay_ticks } => Some(Reply {
                sequence: sequence.wrapping_sub(1),
                crc_ok: true,
                delay_ticks,
            }),
            Peer::Silent | Peer::Scripted(_) => None,
        }
    }

    fn count_reception(&mut self) {
        self.receptions += 1;
        if let Some((receptions, dispatcher)) = self.end_after {
            if self.receptions == receptions {
                dispatcher.trigger_end();
            }
        }
    }

    fn next_inbound(&mut self) -> Option<Inbound> {
        let script = match self.peer {
            Peer::Scripted(script) => script,
            _ => return None,
        };

        let inbound = script.get(self.script_position).copied()?;
        self.script_position += 1;
        Some(inbound)
    }
}

fn copy_frame(sequence: u16, buffer: &mut [u8]) -> usize {
    let frame = RangingFrame::new(sequence);
    let len = FRAME_LEN.min(buffer.len());
    buffer[..len].copy_from_slice(&frame.as_bytes()[..len]);
    len
}

impl<'a> Radio for SimRadio<'a> {
    type Error = SimError;

    fn configure(&mut self, config: &RadioConfig) -> Result<(), Self::Error> {
        self.config = Some(*config);
        self.released = false;
        Ok(())
    }

    fn start_transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        if let Some(limit) = self.fail_after {
            if self.transmits >= limit {
                return Err(SimError::Injected);
            }
        }
        self.transmits += 1;

        if let Ok(sequence) = frame::read_sequence(frame) {
            if self.sent_len < HISTORY_LEN {
                self.sent[self.sent_len] = sequence;
                self.sent_len += 1;
            }
            self.reply = self.reply_to(sequence);
        }

        Ok(())
    }

    fn wait_transmit(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<RxStatus, Self::Error> {
        let status = if let Some(reply) = self.reply.take() {
            self.path.latch(reply.delay_ticks);
            RxStatus {
                crc_ok: reply.crc_ok,
                len: copy_frame(reply.sequence, buffer),
            }
        } else {
            match self.next_inbound() {
                Some(Inbound::Frame(sequence)) => RxStatus {
                    crc_ok: true,
                    len: copy_frame(sequence, buffer),
                },
                Some(Inbound::Corrupted(sequence)) => RxStatus {
                    crc_ok: false,
                    len: copy_frame(sequence, buffer),
                },
                Some(Inbound::Truncated) => RxStatus {
                    crc_ok: true,
                    len: copy_frame(0, buffer).min(1),
                },
                None => return Err(nb::Error::WouldBlock),
            }
        };

        self.count_reception();
        Ok(status)
    }

    fn set_turnaround(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.turnaround = enabled;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        self.reply = None;
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.reply = None;
        self.turnaround = false;
        self.released = true;
        Ok(())
    }
}

/// A timestamp capture fed by a [`SimRadio`]
#[derive(Debug)]
pub struct SimCapture<'a> {
    path: &'a SimTriggerPath,
}

impl<'a> SimCapture<'a> {
    /// Creates a capture latched through the given trigger path
    pub fn new(path: &'a SimTriggerPath) -> Self {
        SimCapture { path }
    }

    /// Whether the trigger path is bound
    pub fn is_bound(&self) -> bool {
        self.path.bound.get()
    }
}

impl<'a> TimestampCapture for SimCapture<'a> {
    fn bind(&mut self) {
        self.path.bound.set(true);
    }

    fn unbind(&mut self) {
        self.path.bound.set(false);
    }

    fn reset(&mut self) {
        self.path.latched.set(0);
    }

    fn captured(&mut self) -> Ticks {
        Ticks::new(self.path.latched.get())
    }
}

/// An in-window timer whose deadlines are expired by hand
///
/// Like a compare register, a deadline stays armed after it expired, and
/// [`SliceTimer::shift`] moves it along with the other one.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimSliceTimer {
    safety_us: Option<u32>,
    extend_us: Option<u32>,
    expired: Option<SliceDeadline>,
}

impl SimSliceTimer {
    /// Creates a stopped timer
    pub const fn new() -> Self {
        SimSliceTimer {
            safety_us: None,
            extend_us: None,
            expired: None,
        }
    }

    /// Where the given deadline is armed, in µs from the window's start
    pub fn armed(&self, deadline: SliceDeadline) -> Option<u32> {
        match deadline {
            SliceDeadline::Safety => self.safety_us,
            SliceDeadline::Extend => self.extend_us,
        }
    }

    /// Lets the given deadline expire
    ///
    /// The scheduler finds out the next time it handles a timer signal. A
    /// deadline that isn't armed doesn't expire.
    pub fn expire(&mut self, deadline: SliceDeadline) {
        if self.armed(deadline).is_some() {
            self.expired = Some(deadline);
        }
    }
}

impl SliceTimer for SimSliceTimer {
    fn arm(&mut self, deadline: SliceDeadline, at_us: u32) {
        match deadline {
            SliceDeadline::Safety => self.safety_us = Some(at_us),
            SliceDeadline::Extend => self.extend_us = Some(at_us),
        }
    }

    fn shift(&mut self, by_us: u32) {
        self.safety_us = self.safety_us.map(|at| at + by_us);
        self.extend_us = self.extend_us.map(|at| at + by_us);
    }

    fn stop(&mut self) {
        *self = SimSliceTimer::new();
    }

    fn take_expired(&mut self) -> Option<SliceDeadline> {
        self.expired.take()
    }
}

/// An error returned by [`SimArbiter`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimArbiterError {
    /// The session couldn't be opened
    OpenRefused,
    /// The request was rejected
    RequestRefused,
}

/// An arbitration service that records every request
///
/// Requests succeed unless [`SimArbiter::refuse_requests`] says otherwise.
/// What the real service would signal in response is up to the test.
#[derive(Clone, Copy, Debug)]
pub struct SimArbiter {
    requests: [Option<SliceRequest>; HISTORY_LEN],
    request_count: usize,
    refusals: u32,
    refuse_open: bool,
    open: bool,
}

impl SimArbiter {
    /// Creates an arbiter that grants everything
    pub fn new() -> Self {
        SimArbiter {
            requests: [None; HISTORY_LEN],
            request_count: 0,
            refusals: 0,
            refuse_open: false,
            open: false,
        }
    }

    /// Makes the next `count` requests fail
    pub fn refuse_requests(&mut self, count: u32) {
        self.refusals = count;
    }

    /// Makes opening a session fail
    pub fn refuse_open(&mut self) {
        self.refuse_open = true;
    }

    /// How many requests were made, including refused ones
    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<SliceRequest> {
        let last = self.request_count.checked_sub(1)?;
        self.requests.get(last).copied().flatten()
    }

    /// Whether a session is open
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Default for SimArbiter {
    fn default() -> Self {
        SimArbiter::new()
    }
}

impl ArbitrationService for SimArbiter {
    type Error = SimArbiterError;

    fn open_session(&mut self) -> Result<(), Self::Error> {
        if self.refuse_open {
            return Err(SimArbiterError::OpenRefused);
        }

        self.open = true;
        Ok(())
    }

    fn request_slice(&mut self, request: &SliceRequest) -> Result<(), Self::Error> {
        if let Some(slot) = self.requests.get_mut(self.request_count) {
            *slot = Some(*request);
        }
        self.request_count += 1;

        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(SimArbiterError::RequestRefused);
        }

        Ok(())
    }

    fn close_session(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }
}
