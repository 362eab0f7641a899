//! Request and reply framing for the temperature sensor.
//!
//! The sensor speaks a fixed request/reply protocol with no terminator and no
//! observed checksum:
//!
//! - Request: the 6-byte command `FF 04 02 00 00 D0`.
//! - Reply: the measurement lives at byte offset 4, two bytes, little-endian
//!   unsigned, in hundredths of a degree (`0x0908` = 2312 = 23.12 °C).
//!
//! Anything after the value field is ignored.

use crate::errors::DecodeError;
use crate::sample::{Sample, SessionClock};

// ============================================================================
// Constants
// ============================================================================

/// Read-temperature command expected by the sensor firmware.
pub const REQUEST_FRAME: [u8; 6] = [0xFF, 0x04, 0x02, 0x00, 0x00, 0xD0];

/// Byte offset of the value field in a reply.
pub const VALUE_OFFSET: usize = 4;

/// Width of the value field in bytes.
pub const VALUE_LEN: usize = 2;

/// Raw counts per degree.
pub const VALUE_SCALE: f64 = 100.0;

/// Integrity check run over a complete reply. Returns `false` to reject it.
pub type FrameValidator = fn(&[u8]) -> bool;

// ============================================================================
// Codec
// ============================================================================

/// Stateless encoder/decoder for the sensor frames.
///
/// The default codec reproduces the observed protocol exactly. A validator can
/// be attached for firmware that appends an integrity field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    validator: Option<FrameValidator>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an integrity check; replies it rejects fail with `ChecksumMismatch`.
    pub fn with_validator(mut self, validator: FrameValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The fixed command frame that asks the sensor for a reading.
    pub fn encode_request(&self) -> Vec<u8> {
        REQUEST_FRAME.to_vec()
    }

    /// Decode a reply and stamp it with the current wall-clock time.
    pub fn decode_reply(&self, bytes: &[u8]) -> Result<Sample, DecodeError> {
        self.decode_reply_at(bytes, SessionClock::new().now())
    }

    /// Decode a reply and stamp it with `timestamp`.
    pub fn decode_reply_at(&self, bytes: &[u8], timestamp: f64) -> Result<Sample, DecodeError> {
        let raw = self.raw_value(bytes)?;
        Ok(Sample::new(timestamp, f64::from(raw) / VALUE_SCALE))
    }

    /// Extract the unscaled value field.
    pub fn raw_value(&self, bytes: &[u8]) -> Result<u16, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let needed = VALUE_OFFSET + VALUE_LEN;
        if bytes.len() < needed {
            return Err(DecodeError::TooShort {
                needed,
                got: bytes.len(),
            });
        }
        if let Some(validate) = self.validator {
            if !validate(bytes) {
                return Err(DecodeError::ChecksumMismatch);
            }
        }
        Ok(u16::from_le_bytes([
            bytes[VALUE_OFFSET],
            bytes[VALUE_OFFSET + 1],
        ]))
    }

    /// Build a reply frame carrying `raw` in the value field.
    ///
    /// The header echoes the first bytes of the request. Used for test vectors
    /// and the simulated sensor.
    pub fn encode_reply(&self, raw: u16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(VALUE_OFFSET + VALUE_LEN);
        frame.extend_from_slice(&REQUEST_FRAME[..VALUE_OFFSET]);
        frame.extend_from_slice(&raw.to_le_bytes());
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_bit_exact() {
        assert_eq!(
            FrameCodec::new().encode_request(),
            vec![0xFF, 0x04, 0x02, 0x00, 0x00, 0xD0]
        );
    }

    #[test]
    fn decodes_little_endian_hundredths() {
        let codec = FrameCodec::new();
        let sample = codec
            .decode_reply_at(&[0x00, 0x00, 0x00, 0x00, 0x08, 0x09], 5.0)
            .unwrap();
        assert_eq!(sample.value, 23.12);
        assert_eq!(sample.timestamp, 5.0);
    }

    #[test]
    fn every_raw_value_scales_exactly() {
        let codec = FrameCodec::new();
        for raw in 0..=u16::MAX {
            let sample = codec.decode_reply_at(&codec.encode_reply(raw), 0.0).unwrap();
            assert_eq!(sample.value, f64::from(raw) / 100.0);
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let codec = FrameCodec::new();
        let mut frame = codec.encode_reply(1234);
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(codec.raw_value(&frame).unwrap(), 1234);
    }

    #[test]
    fn short_and_empty_replies_are_rejected() {
        let codec = FrameCodec::new();
        assert_eq!(codec.decode_reply(&[]), Err(DecodeError::Empty));
        for len in 1..6 {
            let bytes = vec![0u8; len];
            assert_eq!(
                codec.decode_reply(&bytes),
                Err(DecodeError::TooShort { needed: 6, got: len })
            );
        }
    }

    #[test]
    fn validator_rejects_bad_frames() {
        fn needs_header(bytes: &[u8]) -> bool {
            bytes[0] == 0xFF
        }
        let codec = FrameCodec::new().with_validator(needs_header);
        assert!(codec.decode_reply(&codec.encode_reply(100)).is_ok());
        assert_eq!(
            codec.decode_reply(&[0x00, 0x04, 0x02, 0x00, 0x64, 0x00]),
            Err(DecodeError::ChecksumMismatch)
        );
    }
}
