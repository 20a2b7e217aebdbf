//! # Error Types
//!
//! Every per-reading failure is a value, not a panic. The connection handler
//! matches on [`ReadingError`] to decide whether a failure costs one reading or
//! the whole connection.

use std::io;

use thiserror::Error;

/// Failures in the payload decryption path.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("PBKDF2 key derivation failed")]
    KeyDerivation,

    #[error("expected exactly {expected} bytes of ciphertext, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("failed to initialize AES-256-CBC")]
    CipherInit,

    /// Wrong key, corrupted block or a sender that does not pad.
    #[error("failed to finalize decryption (invalid padding)")]
    Padding,
}

/// Failures turning plaintext into a [`MeterReading`](crate::common::reading::MeterReading).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid binary reading size: {actual} bytes (need at least {minimum})")]
    TooShort { actual: usize, minimum: usize },
}

/// Failures on the wire itself. All of these end the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("header has no ':' separator: {0:?}")]
    MissingColon(String),

    #[error("header length is not a number: {0:?}")]
    InvalidLength(String),

    #[error("header is not valid UTF-8")]
    InvalidHeader,

    #[error("header exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("declared payload of {declared} bytes exceeds limit of {limit}")]
    FrameTooLarge { declared: usize, limit: usize },

    #[error("peer closed after {received} of {expected} payload bytes")]
    Truncated { expected: usize, received: usize },

    #[error("server is shutting down")]
    Shutdown,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of handling one frame.
#[derive(Debug, Error)]
pub enum ReadingError {
    #[error(transparent)]
    Framing(#[from] FrameError),

    #[error("Failed to decrypt reading from {device_id}: {source}")]
    Decrypt {
        device_id: String,
        #[source]
        source: CryptoError,
    },

    #[error("Failed to decode reading from {device_id}: {source}")]
    Decode {
        device_id: String,
        #[source]
        source: DecodeError,
    },
}

impl ReadingError {
    /// Framing failures leave the stream at an unknown offset, so the
    /// connection has to go. Crypto and decode failures only drop the reading.
    pub fn closes_connection(&self) -> bool {
        matches!(self, ReadingError::Framing(_))
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            ReadingError::Framing(_) => None,
            ReadingError::Decrypt { device_id, .. } | ReadingError::Decode { device_id, .. } => {
                Some(device_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_framing_errors_close_the_connection() {
        let framing = ReadingError::from(FrameError::MissingColon("meter_000001".into()));
        assert!(framing.closes_connection());
        assert_eq!(framing.device_id(), None);

        let decrypt = ReadingError::Decrypt {
            device_id: "meter_000001".into(),
            source: CryptoError::InvalidLength {
                expected: 16,
                actual: 15,
            },
        };
        assert!(!decrypt.closes_connection());
        assert_eq!(decrypt.device_id(), Some("meter_000001"));

        let decode = ReadingError::Decode {
            device_id: "meter_000002".into(),
            source: DecodeError::TooShort {
                actual: 4,
                minimum: 13,
            },
        };
        assert!(!decode.closes_connection());
    }

    #[test]
    fn test_messages_carry_device_id() {
        let err = ReadingError::Decrypt {
            device_id: "meter_000042".into(),
            source: CryptoError::Padding,
        };
        let message = err.to_string();
        assert!(message.contains("meter_000042"));
        assert!(message.contains("invalid padding"));
    }
}
