//! Board support for round trip time ranging on the nRF52832
//!
//! Implements the hardware seams of [`rtt_ranging`] on the nRF52832:
//!
//! - [`radio::NrfRadio`]: the RADIO peripheral, as a [`Radio`]
//! - [`capture::NrfCapture`]: TIMER2 and two PPI channels, as a
//!   [`TimestampCapture`]
//! - [`slice_timer::NrfSliceTimer`]: TIMER0 within a timeslot, as a
//!   [`SliceTimer`]
//! - [`events`]: Begin and End as software interrupts
//!
//! The arbitration service is the BLE stack's, and has to be provided by the
//! application.
//!
//! [`Radio`]: rtt_ranging::radio::Radio
//! [`TimestampCapture`]: rtt_ranging::radio::TimestampCapture
//! [`SliceTimer`]: rtt_ranging::timeslot::SliceTimer

#![no_std]
#![deny(missing_docs)]

pub use cortex_m;
#[cfg(feature = "rt")]
pub use cortex_m_rt;
pub use embedded_hal;
pub use nrf52832_hal;
pub use rtt_ranging;

/// Exports traits that are usually needed when using this crate
pub mod prelude {
    pub use nrf52832_hal::prelude::*;
}

pub mod capture;
pub mod events;
pub mod radio;
pub mod slice_timer;

use log::debug;
use nrf52832_hal::{
    gpio::{p0, Level, Output, Pin, PushPull},
    pac::{CorePeripherals, Peripherals, EGU3, EGU4, NVIC, TIMER4},
    prelude::*,
    timer::Timer,
};
use rtt_ranging::{
    config::{ConfigError, TimeslotConfig, NUM_BINS},
    dispatch::Dispatcher,
    ranging::{Engine, Error, Summary},
    wait::Deadline,
};
use void::ResultVoidExt;

use crate::{capture::NrfCapture, radio::NrfRadio, slice_timer::NrfSliceTimer};

/// Provides access to the peripherals used for ranging
///
/// The BLE stack reserves a number of peripherals for itself. None of them
/// are exposed here.
#[allow(non_snake_case)]
pub struct Board {
    /// The LEDs on the nRF52-DK
    pub leds: Leds,

    /// The radio, for use during activations
    pub radio: NrfRadio,

    /// The round trip timer, for use during activations
    pub capture: NrfCapture,

    /// The in-slot timer, for the scheduler
    pub slice_timer: NrfSliceTimer,

    /// Bounds every activation
    pub deadline_timer: Timer<TIMER4>,

    /// nRF52 peripheral: EGU3, pended by Begin
    pub EGU3: EGU3,

    /// nRF52 peripheral: EGU4, pended by End
    pub EGU4: EGU4,

    /// Core peripheral: Nested Vectored Interrupt Controller
    pub NVIC: NVIC,
}

impl Board {
    /// Take ownership of a `Board` instance safely
    ///
    /// This method will return an instance of `Board` the first time it is
    /// called. It will return only `None` on subsequent calls.
    pub fn take() -> Option<Self> {
        Some(Self::new(CorePeripherals::take()?, Peripherals::take()?))
    }

    /// Take ownership of a `Board` instance, circumventing safety guarantees
    ///
    /// # Safety
    ///
    /// This method can be used to create multiple instances of `Board`. Those
    /// instances can interfere with each other, causing all kinds of unexpected
    /// behavior and circumventing safety guarantees in many ways.
    ///
    /// Always use `Board::take`, unless you really know what you're doing.
    pub unsafe fn steal() -> Self {
        Self::new(CorePeripherals::steal(), Peripherals::steal())
    }

    fn new(cp: CorePeripherals, p: Peripherals) -> Self {
        let pins = p0::Parts::new(p.P0);

        Board {
            leds: Leds {
                LED1: Led::new(pins.p0_17.degrade()),
                LED2: Led::new(pins.p0_18.degrade()),
                LED3: Led::new(pins.p0_19.degrade()),
                LED4: Led::new(pins.p0_20.degrade()),
            },

            radio: NrfRadio::new(p.RADIO),
            capture: NrfCapture::new(p.TIMER2, p.PPI),
            slice_timer: NrfSliceTimer::new(p.TIMER0),
            deadline_timer: Timer::new(p.TIMER4),

            EGU3: p.EGU3,
            EGU4: p.EGU4,
            NVIC: cp.NVIC,
        }
    }
}

/// The LEDs on the nRF52-DK
#[allow(non_snake_case)]
pub struct Leds {
    /// nRF52-DK: LED1; nRF52: P0.17
    pub LED1: Led,

    /// nRF52-DK: LED2; nRF52: P0.18
    pub LED2: Led,

    /// nRF52-DK: LED3; nRF52: P0.19
    pub LED3: Led,

    /// nRF52-DK: LED4; nRF52: P0.20
    pub LED4: Led,
}

/// An LED on the nRF52-DK
pub struct Led(Pin<Output<PushPull>>);

impl Led {
    /// Create a new (active low) LED
    pub fn new<Mode>(pin: Pin<Mode>) -> Self {
        Led(pin.into_push_pull_output(Level::High))
    }

    /// Enable the LED
    pub fn enable(&mut self) {
        self.0.set_low().void_unwrap();
    }

    /// Disable the LED
    pub fn disable(&mut self) {
        self.0.set_high().void_unwrap();
    }
}

/// Everything the Begin handler needs to run an activation
///
/// Move this into the Begin interrupt handler and call
/// [`Activation::on_begin`] from there.
pub struct Activation<const N: usize = NUM_BINS> {
    /// The role this node plays
    pub engine: Engine<N>,

    /// The radio
    pub radio: NrfRadio,

    /// The round trip timer
    pub capture: NrfCapture,

    deadline_timer: Option<Timer<TIMER4>>,
}

impl<const N: usize> Activation<N> {
    /// Bundles the engine with the hardware it runs on
    ///
    /// Every activation ends after the engine's configured activation length,
    /// or when the dispatcher sees an End, whichever comes first. Fails, if
    /// that length doesn't end before the extend deadline of the windows
    /// negotiated with `timeslot`.
    pub fn new(
        engine: Engine<N>,
        radio: NrfRadio,
        capture: NrfCapture,
        deadline_timer: Timer<TIMER4>,
        timeslot: &TimeslotConfig,
    ) -> Result<Self, ConfigError> {
        engine.config().validate(timeslot)?;

        Ok(Activation {
            engine,
            radio,
            capture,
            deadline_timer: Some(deadline_timer),
        })
    }

    /// Runs one activation, if a Begin is pending
    ///
    /// Returns `None`, if there was nothing to run.
    pub fn on_begin(
        &mut self,
        dispatcher: &Dispatcher,
    ) -> Option<Result<Summary, Error<radio::Error>>> {
        let Activation {
            engine,
            radio,
            capture,
            deadline_timer,
        } = self;

        dispatcher
            .activate(|end_signal| {
                let timer = deadline_timer.take()?;
                let length_us = engine.activation_length_us();
                let mut deadline = Deadline::start(timer, length_us).with_end_signal(end_signal);

                let result = engine.run(radio, capture, &mut deadline);

                *deadline_timer = Some(deadline.free());
                Some(result)
            })
            .flatten()
            .map(|result| {
                if let Ok(summary) = &result {
                    debug!(
                        "activation: {} attempts, {} samples",
                        summary.attempts, summary.samples,
                    );
                }
                result
            })
    }

    /// Releases the hardware
    pub fn free(self) -> (Engine<N>, NrfRadio, NrfCapture, Option<Timer<TIMER4>>) {
        (self.engine, self.radio, self.capture, self.deadline_timer)
    }
}
