//! Diagnostics report
//!
//! A compact summary of a ranging link that the application can forward to
//! the peer or a phone over the BLE connection. Reports are serialized with
//! `ssmarshal`, behind a short prelude that identifies them.

use serde::{Deserialize, Serialize};

use crate::{counters::LinkCounters, ranging::Initiator};

/// The state of a ranging link, at one point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Report {
    /// The link counters
    pub counters: LinkCounters,

    /// Samples in the last completed histogram
    pub samples: u32,

    /// The histogram's most common bin
    pub peak_bin: Option<u16>,

    /// The estimated distance in centimeters
    ///
    /// `None`, if the last histogram held no samples.
    pub distance_cm: Option<i32>,
}

impl Report {
    /// Sent before a report's data to identify it
    pub const PRELUDE: &'static [u8] = b"RTT REPORT";

    /// Maximum length of an encoded report, including the prelude
    ///
    /// Counters, samples, peak bin and distance, with one tag byte for each
    /// `Option`.
    pub const LEN: usize = Self::PRELUDE.len() + 21 + 4 + 3 + 5;

    /// Summarizes the state of an initiator
    pub fn from_initiator<const N: usize>(initiator: &Initiator<N>) -> Self {
        let histogram = initiator.last_histogram();

        Report {
            counters: *initiator.counters(),
            samples: histogram.total(),
            peak_bin: histogram.peak().map(|bin| bin as u16),
            distance_cm: initiator
                .distance_meters()
                .ok()
                .map(|meters| (meters * 100.0) as i32),
        }
    }

    /// Summarizes a set of counters, without any measurements
    ///
    /// This is all a responder has to report.
    pub fn from_counters(counters: &LinkCounters) -> Self {
        Report {
            counters: *counters,
            ..Report::default()
        }
    }

    /// Serializes the report into `buf`
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ReportError> {
        if buf.len() < Self::LEN {
            return Err(ReportError::BufferTooSmall {
                required_len: Self::LEN,
            });
        }

        buf[..Self::PRELUDE.len()].copy_from_slice(Self::PRELUDE);
        let len = ssmarshal::serialize(&mut buf[Self::PRELUDE.len()..], self)?;

        Ok(Self::PRELUDE.len() + len)
    }

    /// Deserializes a report
    ///
    /// Returns `Ok(None)`, if the buffer doesn't hold a report.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, ReportError> {
        if !buf.starts_with(Self::PRELUDE) {
            return Ok(None);
        }

        let (report, _) = ssmarshal::deserialize::<Self>(&buf[Self::PRELUDE.len()..])?;

        Ok(Some(report))
    }
}

/// An error that can occur while encoding or decoding a [`Report`]
#[derive(Debug)]
pub enum ReportError {
    /// The buffer can't hold a report
    BufferTooSmall {
        /// The minimum length
        required_len: usize,
    },

    /// Error occured while serializing or deserializing data
    Ssmarshal(ssmarshal::Error),
}

impl From<ssmarshal::Error> for ReportError {
    fn from(error: ssmarshal::Error) -> Self {
        ReportError::Ssmarshal(error)
    }
}
