//! Begin and End as software interrupts
//!
//! Begin pends SWI3_EGU3, End pends SWI4_EGU4. Both run at priority 7, below
//! the arbiter's signal handler and the BLE stack. The application binds
//! its handlers to those two interrupts and calls [`Activation::on_begin`]
//! and [`Dispatcher::take_end`] from them.
//!
//! [`Activation::on_begin`]: crate::Activation::on_begin

use cortex_m::peripheral::NVIC;
use nrf52832_hal::pac::{Interrupt, EGU3, EGU4};
use rtt_ranging::dispatch::{Dispatcher, Event};

/// The priority of both event interrupts
///
/// The nRF52 implements three priority bits, in the upper bits of the byte.
pub const PRIORITY: u8 = 7 << 5;

/// The interrupt that runs activations
pub const BEGIN_INTERRUPT: Interrupt = Interrupt::SWI3_EGU3;

/// The interrupt that observes the end of an activation
pub const END_INTERRUPT: Interrupt = Interrupt::SWI4_EGU4;

/// The dispatcher shared between the signal handler and the event handlers
pub static DISPATCHER: Dispatcher = Dispatcher::with_hook(trigger);

/// Pends the interrupt for `event`
///
/// Installed as the hook of [`DISPATCHER`].
pub fn trigger(event: Event) {
    // Safe, because triggering an EGU task is an atomic register write that
    // doesn't interfere with anything else the EGUs are doing.
    unsafe {
        match event {
            Event::Begin => (*EGU3::ptr()).tasks_trigger[0].write(|w| w.bits(1)),
            Event::End => (*EGU4::ptr()).tasks_trigger[0].write(|w| w.bits(1)),
        }
    }
}

/// Routes the EGU events to their interrupts and enables them
pub fn enable(egu3: &EGU3, egu4: &EGU4, nvic: &mut NVIC) {
    egu3.intenset.write(|w| w.triggered0().set());
    egu4.intenset.write(|w| w.triggered0().set());

    // Safe, because the handlers only touch `DISPATCHER` and the peripherals
    // the application moved into them.
    unsafe {
        nvic.set_priority(BEGIN_INTERRUPT, PRIORITY);
        nvic.set_priority(END_INTERRUPT, PRIORITY);
        NVIC::unmask(BEGIN_INTERRUPT);
        NVIC::unmask(END_INTERRUPT);
    }
}

/// Acknowledges a Begin in its interrupt handler
pub fn clear_begin(egu3: &EGU3) {
    egu3.events_triggered[0].reset();
}

/// Acknowledges an End in its interrupt handler
pub fn clear_end(egu4: &EGU4) {
    egu4.events_triggered[0].reset();
}
