//! The ranging frame
//!
//! Both ends exchange the same fixed-format frame. The first two bytes are
//! markers that the radio treats as its S0 and length fields, bytes 2 and 3
//! carry a big-endian sequence number, and the rest is fixed payload that
//! only exists to give the frame a known length.
//!
//! The initiator increments the sequence number with every attempt. The
//! responder copies it into its response, so the initiator can tell whether
//! a response belongs to the frame it just sent.

use core::num::Wrapping;

use byte::{BytesExt as _, BE};

/// Length of a ranging frame
pub const FRAME_LEN: usize = 6;

/// Offset of the sequence number within a frame
pub const SEQUENCE_OFFSET: usize = 2;

/// The sequence number a responder sends when it received a corrupted frame
pub const ERROR_MARKER: u16 = 0;

/// A ranging frame, as it goes out over the air
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RangingFrame([u8; FRAME_LEN]);

impl RangingFrame {
    /// Creates a frame with the given sequence number
    ///
    /// # Example
    ///
    /// ``` rust
    /// use rtt_ranging::frame::RangingFrame;
    ///
    /// let frame = RangingFrame::new(0x1234);
    ///
    /// assert_eq!(frame.as_bytes(), &[0x00, 0x04, 0x12, 0x34, 0xFB, 0xE8]);
    /// assert_eq!(frame.sequence(), 0x1234);
    /// ```
    pub fn new(sequence: u16) -> Self {
        let mut frame = RangingFrame(TEMPLATE);
        frame.set_sequence(sequence);
        frame
    }

    /// Overwrites the sequence number
    pub fn set_sequence(&mut self, sequence: u16) {
        // The offset is a constant within the frame, so this can't fail.
        let _ = write_sequence(&mut self.0, sequence);
    }

    /// Returns the sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.0[SEQUENCE_OFFSET], self.0[SEQUENCE_OFFSET + 1]])
    }

    /// Returns the raw bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the raw bytes of the frame, mutably
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for RangingFrame {
    fn default() -> Self {
        RangingFrame(TEMPLATE)
    }
}

const TEMPLATE: [u8; FRAME_LEN] = [0x00, 0x04, 0xFF, 0xC1, 0xFB, 0xE8];

/// Writes a sequence number into a frame buffer
pub fn write_sequence(buffer: &mut [u8], sequence: u16) -> Result<(), byte::Error> {
    let mut offset = SEQUENCE_OFFSET;
    buffer.write_with(&mut offset, sequence, BE)
}

/// Reads the sequence number from a received frame buffer
///
/// Fails, if the buffer is too short to hold one.
pub fn read_sequence(buffer: &[u8]) -> Result<u16, byte::Error> {
    let mut offset = SEQUENCE_OFFSET;
    buffer.read_with(&mut offset, BE)
}

/// Copies the sequence number of a received frame into a response
pub fn echo_sequence(received: &[u8], response: &mut [u8]) -> Result<(), byte::Error> {
    let sequence = read_sequence(received)?;
    write_sequence(response, sequence)
}

/// Marks a response as an answer to a corrupted frame
pub fn mark_error(response: &mut [u8]) -> Result<(), byte::Error> {
    write_sequence(response, ERROR_MARKER)
}

/// Checks whether an echoed sequence number belongs to the last frame sent
///
/// Only 16 bits of the sequence counter go over the air, so the comparison
/// happens modulo 2^16.
///
/// # Example
///
/// ``` rust
/// use core::num::Wrapping;
/// use rtt_ranging::frame::sequence_matches;
///
/// let mut sent = Wrapping(0xFFFFu16);
/// assert!(sequence_matches(sent, 0xFFFF));
///
/// sent += Wrapping(1);
/// assert!(sequence_matches(sent, 0x0000));
/// assert!(!sequence_matches(sent, 0xFFFF));
/// ```
pub fn sequence_matches(sent: Wrapping<u16>, echoed: u16) -> bool {
    sent.0 == echoed
}
