//! Round trip time ranging between two nRF52 radios
//!
//! Two radios measure the distance between them by timing how long a frame
//! takes to get to the other side and back. The radio is shared with a BLE
//! stack, so all measurements happen within timeslots negotiated from the
//! stack's arbitration service.
//!
//! The pieces, from the bottom up:
//!
//! - [`radio`]: the hardware seams, [`radio::Radio`] and
//!   [`radio::TimestampCapture`]
//! - [`ranging`]: the [`Initiator`] and [`Responder`] roles, which run the
//!   measurements within an activation
//! - [`histogram`]: turns many round trips into a distance
//! - [`timeslot`]: the [`Scheduler`], which negotiates the radio time
//! - [`dispatch`]: the [`Dispatcher`], which hands activations from the
//!   scheduler's interrupt to a lower priority
//!
//! This crate doesn't touch any hardware itself. The `nrf52-rtt` crate
//! implements the seams on the nRF52832, and [`sim`] implements them for
//! tests.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod config;
pub mod counters;
pub mod dispatch;
pub mod frame;
pub mod histogram;
pub mod radio;
pub mod ranging;
pub mod report;
pub mod sim;
pub mod time;
pub mod timeslot;
pub mod wait;

pub use crate::{
    config::{Calibration, RadioConfig, RangingConfig, TimeslotConfig},
    counters::LinkCounters,
    dispatch::{Dispatcher, Event},
    histogram::{distance_meters, DistanceError, Histogram},
    ranging::{Engine, Error, Initiator, Responder, Summary},
    report::Report,
    time::Ticks,
    timeslot::{Scheduler, SessionError},
};
