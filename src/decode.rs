//! Heart Rate Measurement (0x2A37) payload decoding.

use uuid::Uuid;

use crate::error::DecodeError;


pub const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a3700001000800000805f9b34fb);

/// Flags bit 0: heart rate value is a little-endian u16 instead of a u8.
const FLAG_VALUE_FORMAT_U16: u8 = 0b0000_0001;

/// Extracts the BPM value from a raw notification.
///
/// Only the value-format bit of the flags byte is interpreted. Sensor contact,
/// energy expended and RR-interval fields may follow the value and are ignored.
pub fn decode(raw: &[u8]) -> Result<u16, DecodeError> {
    let Some(&flags) = raw.first() else {
        return Err(DecodeError::TooShort { len: 0, needed: 2 });
    };

    if flags & FLAG_VALUE_FORMAT_U16 == 0 {
        match raw.get(1) {
            Some(&bpm) => Ok(bpm as u16),
            None => Err(DecodeError::TooShort { len: raw.len(), needed: 2 }),
        }
    } else {
        match raw.get(1..3) {
            Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(DecodeError::TooShort { len: raw.len(), needed: 3 }),
        }
    }
}
