//! # Meter Reading Wire Format
//!
//! A decrypted payload is a fixed big-endian record:
//!
//! ```text
//! offset  size  field
//! 0       4     timestamp (seconds, u32)
//! 4       2     device sequence number (u16)
//! 6       2     voltage x10 (u16)
//! 8       2     current x divisor (u16)
//! 10      2     power, whole watts (u16)
//! 12      1     frequency x10 (u8)
//! ```
//!
//! There is no checksum or version byte. A flipped bit decodes to a wrong but
//! well-formed reading.

use crate::error::DecodeError;

/// Minimum plaintext length of a reading record.
pub const READING_LEN: usize = 13;

/// Acceptable supply voltage; readings outside raise an alert.
pub const VOLTAGE_RANGE: std::ops::RangeInclusive<f64> = 100.0..=140.0;

/// Integer fields exactly as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReading {
    pub timestamp: u32,
    pub device_num: u16,
    pub voltage: u16,
    pub current: u16,
    pub power: u16,
    pub frequency: u8,
}

impl RawReading {
    /// Parse the fixed layout. Bytes past [`READING_LEN`] are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < READING_LEN {
            return Err(DecodeError::TooShort {
                actual: data.len(),
                minimum: READING_LEN,
            });
        }

        Ok(Self {
            timestamp: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            device_num: u16::from_be_bytes([data[4], data[5]]),
            voltage: u16::from_be_bytes([data[6], data[7]]),
            current: u16::from_be_bytes([data[8], data[9]]),
            power: u16::from_be_bytes([data[10], data[11]]),
            frequency: data[12],
        })
    }

    /// Pack into the on-wire layout, the way devices serialize before encrypting.
    pub fn to_bytes(&self) -> [u8; READING_LEN] {
        let mut out = [0u8; READING_LEN];
        out[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        out[4..6].copy_from_slice(&self.device_num.to_be_bytes());
        out[6..8].copy_from_slice(&self.voltage.to_be_bytes());
        out[8..10].copy_from_slice(&self.current.to_be_bytes());
        out[10..12].copy_from_slice(&self.power.to_be_bytes());
        out[12] = self.frequency;
        out
    }

    /// Display name synthesized from the sequence number. Never used for
    /// key lookup; the header's device id is authoritative.
    pub fn display_id(&self) -> String {
        format!("meter_{:06}", self.device_num)
    }
}

/// One decoded reading in engineering units.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    pub device_id: String,
    pub timestamp: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub frequency: f64,
}

impl MeterReading {
    /// Scale raw wire integers. `current_divisor` is deployment configuration
    /// because the record does not say which scale the device used.
    pub fn from_raw(device_id: impl Into<String>, raw: &RawReading, current_divisor: f64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: f64::from(raw.timestamp),
            voltage: f64::from(raw.voltage) / 10.0,
            current: f64::from(raw.current) / current_divisor,
            power: f64::from(raw.power),
            frequency: f64::from(raw.frequency) / 10.0,
        }
    }

    pub fn decode(
        device_id: impl Into<String>,
        plaintext: &[u8],
        current_divisor: f64,
    ) -> Result<Self, DecodeError> {
        let raw = RawReading::decode(plaintext)?;
        Ok(Self::from_raw(device_id, &raw, current_divisor))
    }

    /// Negative power or voltage outside [`VOLTAGE_RANGE`].
    pub fn is_anomalous(&self) -> bool {
        self.power < 0.0 || !VOLTAGE_RANGE.contains(&self.voltage)
    }
}
