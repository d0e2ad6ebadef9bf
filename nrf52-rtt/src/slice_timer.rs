//! TIMER0 as the in-slot timer
//!
//! The arbiter hands TIMER0 over for the duration of every slot, clocked at
//! 1 MHz. CC[0] holds the safety deadline, CC[1] the extend deadline. Their
//! compare interrupts arrive at the scheduler as [`SliceSignal::Timer`].
//!
//! [`SliceSignal::Timer`]: rtt_ranging::timeslot::SliceSignal::Timer

use nrf52832_hal::pac::TIMER0;
use rtt_ranging::timeslot::{SliceDeadline, SliceTimer};

const INTEN_COMPARE0: u32 = 1 << 16;

/// 24 bits are enough for the longest slot the arbiter hands out
const BITMODE_24: u32 = 2;

/// 16 MHz / 2^4
const PRESCALER_1MHZ: u32 = 4;

fn channel(deadline: SliceDeadline) -> usize {
    match deadline {
        SliceDeadline::Safety => 0,
        SliceDeadline::Extend => 1,
    }
}

/// The in-slot timer
pub struct NrfSliceTimer {
    timer: TIMER0,
}

impl NrfSliceTimer {
    /// Wraps TIMER0
    pub fn new(timer: TIMER0) -> Self {
        NrfSliceTimer { timer }
    }

    /// Releases TIMER0
    pub fn free(self) -> TIMER0 {
        self.timer
    }

    fn expired(&self, channel: usize) -> bool {
        let enabled = self.timer.intenset.read().bits() & (INTEN_COMPARE0 << channel) != 0;
        let fired = self.timer.events_compare[channel].read().bits() != 0;

        if enabled && fired {
            self.timer.events_compare[channel].reset();
        }
        enabled && fired
    }
}

impl SliceTimer for NrfSliceTimer {
    fn arm(&mut self, deadline: SliceDeadline, at_us: u32) {
        let channel = channel(deadline);

        // Safe, because every value written below is valid for its register
        unsafe {
            self.timer.cc[channel].write(|w| w.bits(at_us));
            self.timer
                .intenset
                .write(|w| w.bits(INTEN_COMPARE0 << channel));
            self.timer.tasks_start.write(|w| w.bits(1));
        }
    }

    fn shift(&mut self, by_us: u32) {
        unsafe {
            self.timer.tasks_stop.write(|w| w.bits(1));
            for channel in 0..2 {
                self.timer.events_compare[channel].reset();
                self.timer.cc[channel].modify(|r, w| w.bits(r.bits().wrapping_add(by_us)));
            }
            self.timer.tasks_start.write(|w| w.bits(1));
        }
    }

    fn stop(&mut self) {
        // Safe, because every value written below is valid for its register
        unsafe {
            self.timer.tasks_stop.write(|w| w.bits(1));
            self.timer.tasks_clear.write(|w| w.bits(1));
            self.timer
                .intenclr
                .write(|w| w.bits(INTEN_COMPARE0 | INTEN_COMPARE0 << 1));
            self.timer.mode.write(|w| w.bits(0));
            self.timer.bitmode.write(|w| w.bits(BITMODE_24));
            self.timer.prescaler.write(|w| w.bits(PRESCALER_1MHZ));
        }
        self.timer.events_compare[0].reset();
        self.timer.events_compare[1].reset();
    }

    fn take_expired(&mut self) -> Option<SliceDeadline> {
        if self.expired(channel(SliceDeadline::Safety)) {
            return Some(SliceDeadline::Safety);
        }
        if self.expired(channel(SliceDeadline::Extend)) {
            return Some(SliceDeadline::Extend);
        }

        None
    }
}
