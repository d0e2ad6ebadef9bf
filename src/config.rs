//! Configuration structs for the radio, the timeslots and the measurements
//!
//! This module houses the datastructures that control how frames are sent,
//! how much radio time is negotiated, and how measured ticks are turned into
//! a distance. The defaults match a pair of nRF52 development kits talking
//! on 2478 MHz. The calibration values were found empirically for one device
//! pair and will need adjusting for other hardware.

use serde::{Deserialize, Serialize};

/// Number of bins in a histogram
pub const NUM_BINS: usize = 128;

/// Frequency of the capture timer that measures round trips
pub const TICK_HZ: u32 = 16_000_000;

/// Longest wait for an earliest-possible timeslot that the arbiter accepts
pub const EARLIEST_TIMEOUT_MAX_US: u32 = 128_000_000;

/// Radio configuration shared by both ends of the link
///
/// The initiator and the responder must use identical values, or no frame
/// will ever be received.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RadioConfig {
    /// Modulation of the transmission
    pub mode: Mode,
    /// Access address of the ranging link
    pub access_address: u32,
    /// CRC polynomial
    pub crc_polynomial: u32,
    /// CRC initial value
    pub crc_init: u32,
    /// Length of the CRC in bytes
    pub crc_length: u8,
    /// Frequency, as an offset from 2400 MHz
    pub frequency: u8,
    /// Transmit power in dBm
    pub tx_power: i8,
    /// Inter frame spacing used by the responder's automatic turnaround
    pub inter_frame_spacing_us: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            mode: Default::default(),
            access_address: 0x7176_4129,
            crc_polynomial: 0x65B,
            crc_init: 0x55_5555,
            crc_length: 3,
            frequency: 78,
            tx_power: 0,
            inter_frame_spacing_us: 192,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// The modulation used on air
pub enum Mode {
    /// Bluetooth Low Energy, 1 megabit per second
    Ble1Mbit = 3,
    /// Bluetooth Low Energy, 2 megabits per second
    Ble2Mbit = 4,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Ble2Mbit
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// Priority of a timeslot request
pub enum Priority {
    /// Can preempt most of the BLE stack's own activity
    High = 0,
    /// Only granted when the BLE stack is idle
    Normal = 1,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::High
    }
}

/// How much radio time is negotiated from the arbiter
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TimeslotConfig {
    /// Length of the first slot of a session
    pub initial_length_us: u32,
    /// Length added by every extension
    pub extension_length_us: u32,
    /// The window is left this long before it ends
    pub safety_margin_us: u32,
    /// An extension is requested this long before the window ends
    pub extend_margin_us: u32,
    /// Ceiling for the extensions of one window
    pub budget_us: u32,
    /// Part of the budget that is never handed out
    pub budget_reserve_us: u32,
    /// Subtracted from every deadline shift after an extension
    ///
    /// The arbiter needs some time to process the extension. This is a
    /// calibration constant, not an algorithmic one.
    pub extension_correction_us: u32,
    /// Priority of every request
    pub priority: Priority,
    /// How long an earliest-possible request may wait for its slot
    pub earliest_timeout_us: u32,
}

impl Default for TimeslotConfig {
    fn default() -> Self {
        TimeslotConfig {
            initial_length_us: 10_000,
            extension_length_us: 10_000,
            safety_margin_us: 250,
            extend_margin_us: 500,
            budget_us: 1_000_000,
            budget_reserve_us: 5_000,
            extension_correction_us: 25,
            priority: Default::default(),
            earliest_timeout_us: EARLIEST_TIMEOUT_MAX_US,
        }
    }
}

impl TimeslotConfig {
    /// Checks that the margins and the budget are consistent
    ///
    /// The extend deadline has to come before the safety deadline, both must
    /// fall inside the window, and the reserve can't eat the whole budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extend_margin_us <= self.safety_margin_us {
            return Err(ConfigError::MarginsOverlap);
        }
        if self.extend_margin_us >= self.initial_length_us
            || self.extend_margin_us >= self.extension_length_us
        {
            return Err(ConfigError::MarginExceedsSlot);
        }
        if self.extension_correction_us >= self.extension_length_us {
            return Err(ConfigError::MarginExceedsSlot);
        }
        if self.budget_reserve_us > self.budget_us {
            return Err(ConfigError::ReserveExceedsBudget);
        }

        Ok(())
    }

    /// The most time extensions may accumulate in one window
    pub fn budget_ceiling_us(&self) -> u32 {
        self.budget_us.saturating_sub(self.budget_reserve_us)
    }
}

/// Parameters of the measurement loop
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RangingConfig {
    /// How long one activation keeps measuring
    ///
    /// Must end before the window's extend deadline, so the scheduler has
    /// some headroom for its own bookkeeping.
    pub activation_length_us: u32,
    /// How often the receiver is polled for a response before giving up
    pub response_poll_limit: u32,
    /// Number of attempts after which the error rate is re-evaluated
    pub error_window: u32,
    /// Timeouts within one window above which the error rate counts as high
    pub error_threshold: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig::for_timeslot(&TimeslotConfig::default())
    }
}

impl RangingConfig {
    /// Derives the activation length from a timeslot configuration
    ///
    /// Leaves one millisecond between the end of the measurements and the
    /// extend deadline.
    pub fn for_timeslot(timeslot: &TimeslotConfig) -> Self {
        const END_MARGIN_US: u32 = 1_000;

        RangingConfig {
            activation_length_us: timeslot
                .initial_length_us
                .saturating_sub(END_MARGIN_US + timeslot.extend_margin_us),
            response_poll_limit: 2048,
            error_window: 50,
            error_threshold: 10,
        }
    }

    /// Checks that an activation ends before the window's extend deadline
    pub fn validate(&self, timeslot: &TimeslotConfig) -> Result<(), ConfigError> {
        let extend_deadline_us = timeslot
            .initial_length_us
            .saturating_sub(timeslot.extend_margin_us);

        if self.activation_length_us == 0 || self.activation_length_us >= extend_deadline_us {
            return Err(ConfigError::ActivationTooLong);
        }

        Ok(())
    }
}

/// Device pair calibration
///
/// None of these values are derived from first principles. They were found
/// by measuring known distances and are only valid for the hardware they were
/// measured on.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Calibration {
    /// Ticks subtracted from a measured round trip to get its bin
    ///
    /// Trims away the responder's turnaround time and the radio pipeline
    /// delays on both ends.
    pub bin_offset_ticks: u32,
    /// Meters of distance per bin
    pub distance_scale_m: f32,
    /// Meters subtracted from the scaled mean bin
    pub distance_offset_m: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            bin_offset_ticks: 4150,
            distance_scale_m: 0.5 * METERS_PER_TICK,
            distance_offset_m: 69.96,
        }
    }
}

/// Distance light travels during one capture timer tick
pub const METERS_PER_TICK: f32 = 18.737;

/// Returned from [`TimeslotConfig::validate`] and [`RangingConfig::validate`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The extend margin is not larger than the safety margin
    MarginsOverlap,

    /// A margin doesn't fit into the slot it applies to
    MarginExceedsSlot,

    /// The reserve is larger than the budget
    ReserveExceedsBudget,

    /// An activation would run past the extend deadline, or not at all
    ActivationTooLong,
}
