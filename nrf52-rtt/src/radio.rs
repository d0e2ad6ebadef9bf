//! The RADIO peripheral as a ranging radio
//!
//! Frames are sent and received through EasyDMA, from buffers owned by
//! [`NrfRadio`]. The radio runs with the READY→START and END→DISABLE
//! shortcuts, so a single task starts a complete transmission or reception.

use core::sync::atomic::{compiler_fence, Ordering};

use log::warn;
use nrf52832_hal::pac::RADIO;
use rtt_ranging::{
    config::RadioConfig,
    radio::{Radio, RxStatus},
};

/// Size of the DMA buffers
pub const BUFFER_LEN: usize = 32;

/// S0 is one byte, the length field eight bits, and the preamble 16 bits
const PCNF0: u32 = 0x0100_0108;

/// Three byte base address, little endian, no whitening
const PCNF1_BALEN_3: u32 = 0x0003_0000;

/// Header bytes in front of the payload: S0 and the length field
const HEADER_LEN: usize = 2;

/// The CRC doesn't cover the address
const CRCCNF_SKIP_ADDRESS: u32 = 1 << 8;

/// Initial value of the data whitening, unused while whitening is off
const DATAWHITEIV: u32 = 39;

const STATE_DISABLED: u32 = 0;

/// How often the DISABLED event is polled for before giving up
///
/// Disabling takes a few µs, so this is generous.
const DISABLE_POLLS: u32 = 10_000;

/// An error reported by [`NrfRadio`]
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The frame doesn't fit into the DMA buffer
    FrameTooLong {
        /// Length of the frame
        len: usize,
    },

    /// The radio didn't reach the disabled state in time
    DisableTimeout,
}

/// The nRF52's radio, configured for ranging frames
pub struct NrfRadio {
    radio: RADIO,
    tx_buffer: [u8; BUFFER_LEN],
    rx_buffer: [u8; BUFFER_LEN],
    turnaround: bool,
}

impl NrfRadio {
    /// Wraps the RADIO peripheral
    ///
    /// The radio stays untouched until it is configured.
    pub fn new(radio: RADIO) -> Self {
        NrfRadio {
            radio,
            tx_buffer: [0; BUFFER_LEN],
            rx_buffer: [0; BUFFER_LEN],
            turnaround: false,
        }
    }

    /// Releases the RADIO peripheral
    pub fn free(self) -> RADIO {
        self.radio
    }

    fn end_event(&self) -> bool {
        if self.radio.events_end.read().bits() == 0 {
            return false;
        }

        self.radio.events_end.reset();
        compiler_fence(Ordering::Acquire);
        true
    }
}

impl Radio for NrfRadio {
    type Error = Error;

    fn configure(&mut self, config: &RadioConfig) -> Result<(), Self::Error> {
        let r = &self.radio;

        r.power.write(|w| w.power().enabled());
        r.shorts
            .write(|w| w.ready_start().enabled().end_disable().enabled());

        // Safe, because every value written below is valid for its register
        unsafe {
            r.mode.write(|w| w.bits(config.mode as u32));
            r.tifs
                .write(|w| w.bits(config.inter_frame_spacing_us as u32));

            r.base0.write(|w| w.bits(config.access_address << 8));
            r.prefix0
                .write(|w| w.bits(0xFFFF_FF00 | config.access_address >> 24));
            r.txaddress.write(|w| w.bits(0));
            r.rxaddresses.write(|w| w.bits(1));

            r.datawhiteiv.write(|w| w.bits(DATAWHITEIV));
            r.pcnf0.write(|w| w.bits(PCNF0));
            r.pcnf1
                .write(|w| w.bits(PCNF1_BALEN_3 | (BUFFER_LEN - HEADER_LEN) as u32));

            r.crcpoly.write(|w| w.bits(config.crc_polynomial));
            r.crcinit.write(|w| w.bits(config.crc_init));
            r.crccnf
                .write(|w| w.bits(CRCCNF_SKIP_ADDRESS | config.crc_length as u32));

            r.frequency.write(|w| w.bits(config.frequency as u32));
            r.txpower.write(|w| w.bits(config.tx_power as u8 as u32));
        }

        Ok(())
    }

    fn start_transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        let buffer = self
            .tx_buffer
            .get_mut(..frame.len())
            .ok_or(Error::FrameTooLong { len: frame.len() })?;
        buffer.copy_from_slice(frame);

        let tx_buffer = &self.tx_buffer;
        self.radio
            .packetptr
            .write(|w| unsafe { w.bits(tx_buffer.as_ptr() as u32) });
        self.radio.events_end.reset();
        compiler_fence(Ordering::Release);

        // With the turnaround enabled, the end of the last reception already
        // started the transmitter. It sends whatever the packet pointer
        // points to once it's ready.
        if !self.turnaround {
            self.radio.events_ready.reset();
            self.radio.tasks_txen.write(|w| unsafe { w.bits(1) });
        }

        Ok(())
    }

    fn wait_transmit(&mut self) -> nb::Result<(), Self::Error> {
        if !self.end_event() {
            return Err(nb::Error::WouldBlock);
        }

        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        let rx_buffer = &mut self.rx_buffer;
        self.radio
            .packetptr
            .write(|w| unsafe { w.bits(rx_buffer.as_mut_ptr() as u32) });
        self.radio.events_end.reset();
        compiler_fence(Ordering::Release);

        self.radio.events_ready.reset();
        self.radio.tasks_rxen.write(|w| unsafe { w.bits(1) });

        Ok(())
    }

    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<RxStatus, Self::Error> {
        if !self.end_event() {
            return Err(nb::Error::WouldBlock);
        }

        let crc_ok = self.radio.crcstatus.read().bits() & 1 == 1;
        let len = (HEADER_LEN + self.rx_buffer[1] as usize)
            .min(BUFFER_LEN)
            .min(buffer.len());
        buffer[..len].copy_from_slice(&self.rx_buffer[..len]);

        Ok(RxStatus { crc_ok, len })
    }

    fn set_turnaround(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.radio.shorts.modify(|_, w| {
            if enabled {
                w.disabled_txen().enabled()
            } else {
                w.disabled_txen().disabled()
            }
        });
        self.turnaround = enabled;

        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        if self.radio.state.read().bits() == STATE_DISABLED {
            return Ok(());
        }

        self.radio.events_disabled.reset();
        self.radio.tasks_disable.write(|w| unsafe { w.bits(1) });

        for _ in 0..DISABLE_POLLS {
            if self.radio.events_disabled.read().bits() != 0 {
                self.radio.events_disabled.reset();
                return Ok(());
            }
        }

        warn!("radio: not disabled after {} polls", DISABLE_POLLS);
        Err(Error::DisableTimeout)
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.radio.tasks_disable.write(|w| unsafe { w.bits(1) });
        self.radio.shorts.reset();
        self.radio.intenclr.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        self.radio.events_disabled.reset();
        self.radio.power.write(|w| w.power().disabled());
        self.turnaround = false;

        Ok(())
    }
}
