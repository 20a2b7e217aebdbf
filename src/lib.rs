//! # Grid Ingest
//!
//! TCP ingestion server for encrypted smart-meter telemetry.
//!
//! ```text
//! accept -> worker pool -> [frame -> decrypt -> decode] -> aggregate
//!                                                   |
//!                                         benchmark finalize
//! ```
//!
//! - [`common`]: wire framing and the binary reading record
//! - [`crypto`]: per-device key cache and AES-256-CBC decryption
//! - [`server`]: listener, connection handling, aggregation, metrics
//! - [`logging`]: console logger with `OK`/`ALERT`/`SUM` labels
//! - [`error`]: typed per-reading failures

pub mod common;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod server;

pub use common::reading::MeterReading;
pub use server::{Server, ServerConfig};
