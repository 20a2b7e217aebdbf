//! # Device Wire Framing
//!
//! Devices send one or more frames per TCP connection:
//!
//! ```text
//! <device_id>:<n>\n      ASCII header, optional \r before \n
//! <n raw bytes>          ciphertext (one AES block in practice)
//! ```
//!
//! The reader works on any blocking [`Read`]. Sockets are given a short read
//! timeout so an idle connection can notice server shutdown; partial headers
//! and payloads survive those timeouts.
//!
//! After shutdown a frame that keeps arriving is still read to the end, but a
//! frame whose sender stalls for one full read timeout is abandoned and the
//! partial bytes are discarded. The reading is lost, not half-processed.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};

use crate::error::FrameError;

/// Longest header line accepted, excluding the newline.
pub const MAX_HEADER_LEN: usize = 256;

/// Largest payload a header may declare.
pub const MAX_FRAME_LEN: usize = 4096;

/// One header + ciphertext unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub device_id: String,
    pub payload: Vec<u8>,
}

/// Parse `"<device_id>:<length>"`. The device id is everything before the
/// first colon.
pub fn parse_header(line: &str) -> Result<(String, usize), FrameError> {
    let (device_id, length) = line
        .split_once(':')
        .ok_or_else(|| FrameError::MissingColon(line.to_string()))?;

    let declared: usize = length
        .trim()
        .parse()
        .map_err(|_| FrameError::InvalidLength(length.to_string()))?;

    if declared > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge {
            declared,
            limit: MAX_FRAME_LEN,
        });
    }

    Ok((device_id.to_string(), declared))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Buffered frame reader over a device connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a blocking reader.
    ///
    /// # Arguments
    /// - `inner`: A connected socket (with a read timeout) or any in-memory reader
    ///
    /// # Example
    /// ```ignore
    /// let mut frames = FrameReader::new(stream);
    /// while let Some(frame) = frames.read_frame(&|| shutdown.is_triggered())? {
    ///     core.handle_frame(frame)?;
    /// }
    /// ```
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read the next frame.
    ///
    /// # Returns
    /// - `Ok(Some(frame))`: a complete header and payload
    /// - `Ok(None)`: the peer closed, or sent an empty header line
    /// - `Err(FrameError::Shutdown)`: `cancelled` reported true while waiting
    /// - `Err(_)`: any other framing or transport failure
    pub fn read_frame(
        &mut self,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<Frame>, FrameError> {
        let header = match self.read_header(cancelled)? {
            Some(header) if !header.is_empty() => header,
            _ => return Ok(None),
        };

        let (device_id, length) = parse_header(&header)?;
        let payload = self.read_payload(length, cancelled)?;

        Ok(Some(Frame { device_id, payload }))
    }

    fn read_header(&mut self, cancelled: &dyn Fn() -> bool) -> Result<Option<String>, FrameError> {
        let mut line = Vec::new();

        loop {
            let available = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    if cancelled() {
                        return Err(FrameError::Shutdown);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // EOF, with or without a partial header
            if available.is_empty() {
                return Ok(None);
            }

            let (consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    line.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    line.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.inner.consume(consumed);

            if line.len() > MAX_HEADER_LEN {
                return Err(FrameError::HeaderTooLong {
                    limit: MAX_HEADER_LEN,
                });
            }
            if complete {
                break;
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        String::from_utf8(line)
            .map(Some)
            .map_err(|_| FrameError::InvalidHeader)
    }

    /// Read exactly `length` bytes, retrying short reads.
    fn read_payload(
        &mut self,
        length: usize,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Vec<u8>, FrameError> {
        let mut payload = vec![0u8; length];
        let mut filled = 0;

        while filled < length {
            match self.inner.read(&mut payload[filled..]) {
                Ok(0) => {
                    return Err(FrameError::Truncated {
                        expected: length,
                        received: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    if cancelled() {
                        return Err(FrameError::Shutdown);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(payload)
    }
}
