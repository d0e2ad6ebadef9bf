//! TIMER2 and two PPI channels as a zero latency round trip timer

use nrf52832_hal::pac::{PPI, RADIO, TIMER2};
use rtt_ranging::{radio::TimestampCapture, time::Ticks};

/// RADIO ADDRESS → TIMER2 CAPTURE[0]
const CAPTURE_CHANNEL: usize = 6;

/// RADIO ADDRESS → TIMER2 START
const START_CHANNEL: usize = 7;

const CHANNELS: u32 = (1 << CAPTURE_CHANNEL) | (1 << START_CHANNEL);

/// Measures round trips between two radio ADDRESS events
///
/// The transmitted frame's address starts TIMER2, the response's address
/// latches it into CC[0]. TIMER2 runs at the full 16 MHz, so one tick is
/// 62.5 ns.
pub struct NrfCapture {
    timer: TIMER2,
    ppi: PPI,
}

impl NrfCapture {
    /// Sets up TIMER2 and the PPI channels, leaving them unbound
    pub fn new(timer: TIMER2, ppi: PPI) -> Self {
        // Safe, because every value written below is valid for its register
        unsafe {
            timer.tasks_stop.write(|w| w.bits(1));
            timer.mode.write(|w| w.bits(0));
            timer.bitmode.write(|w| w.bits(3));
            timer.prescaler.write(|w| w.bits(0));
            timer.shorts.write(|w| w.bits(0));
            timer.cc[0].write(|w| w.bits(0));
            timer.events_compare[0].write(|w| w.bits(0));
            timer.tasks_clear.write(|w| w.bits(1));

            let address_event = &(*RADIO::ptr()).events_address as *const _ as u32;

            ppi.ch[CAPTURE_CHANNEL]
                .eep
                .write(|w| w.bits(address_event));
            ppi.ch[CAPTURE_CHANNEL]
                .tep
                .write(|w| w.bits(&timer.tasks_capture[0] as *const _ as u32));

            ppi.ch[START_CHANNEL].eep.write(|w| w.bits(address_event));
            ppi.ch[START_CHANNEL]
                .tep
                .write(|w| w.bits(&timer.tasks_start as *const _ as u32));
        }

        NrfCapture { timer, ppi }
    }

    /// Releases the peripherals
    pub fn free(mut self) -> (TIMER2, PPI) {
        self.unbind();
        (self.timer, self.ppi)
    }
}

impl TimestampCapture for NrfCapture {
    fn bind(&mut self) {
        self.ppi.chenset.write(|w| unsafe { w.bits(CHANNELS) });
    }

    fn unbind(&mut self) {
        self.ppi.chenclr.write(|w| unsafe { w.bits(CHANNELS) });
        self.timer.tasks_stop.write(|w| unsafe { w.bits(1) });
    }

    fn reset(&mut self) {
        self.timer.tasks_stop.write(|w| unsafe { w.bits(1) });
        self.timer.tasks_clear.write(|w| unsafe { w.bits(1) });
    }

    fn captured(&mut self) -> Ticks {
        self.timer.tasks_stop.write(|w| unsafe { w.bits(1) });
        Ticks::new(self.timer.cc[0].read().bits())
    }
}
