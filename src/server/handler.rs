//! Per-connection state machine.
//!
//! ```text
//! AWAIT_HEADER -> READ_PAYLOAD -> DECRYPT -> DECODE -> AGGREGATE -+
//!      ^                                                          |
//!      +----------------------------------------------------------+
//! ```
//!
//! Framing failures and peer close go to CLOSE. Decrypt and decode failures
//! drop the reading and loop back to AWAIT_HEADER on the same connection.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, warn};

use super::metrics::ConnectionGuard;
use super::pipeline::ServerCore;
use crate::common::connection::FrameReader;
use crate::error::{FrameError, ReadingError};

pub struct ConnectionHandler<S> {
    core: Arc<ServerCore>,
    frames: FrameReader<S>,
    peer: SocketAddr,
    _guard: ConnectionGuard,
}

impl<S: Read> ConnectionHandler<S> {
    pub fn new(core: Arc<ServerCore>, stream: S, peer: SocketAddr, guard: ConnectionGuard) -> Self {
        Self {
            core,
            frames: FrameReader::new(stream),
            peer,
            _guard: guard,
        }
    }

    /// Process frames until the peer closes, a framing error occurs or the
    /// server shuts down. Returns the number of readings accepted.
    pub fn run(mut self) -> u64 {
        let mut accepted = 0;

        loop {
            if self.core.shutdown_handle().is_triggered() {
                debug!("🛑 Closing connection from {} - server shutting down", self.peer);
                break;
            }

            match self.next_reading() {
                Ok(true) => accepted += 1,
                Ok(false) => {
                    debug!("🔌 Connection from {} closed by peer", self.peer);
                    break;
                }
                Err(ReadingError::Framing(FrameError::Shutdown)) => break,
                Err(e) if e.closes_connection() => {
                    warn!("⚠️  Closing connection from {}: {}", self.peer, e);
                    break;
                }
                Err(e) => {
                    self.core.counters().record_failure();
                    error!("❌ Dropped reading from {}: {}", self.peer, e);
                }
            }
        }

        accepted
    }

    /// One pass through the state machine. `Ok(false)` means the peer closed.
    fn next_reading(&mut self) -> Result<bool, ReadingError> {
        let core = &self.core;
        let Some(frame) = self
            .frames
            .read_frame(&|| core.shutdown_handle().is_triggered())?
        else {
            return Ok(false);
        };

        self.core.handle_frame(frame)?;
        Ok(true)
    }
}
