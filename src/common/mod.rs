//! # Common Components
//!
//! Wire-level pieces shared by the server and its tests.
//!
//! ## Modules
//!
//! - [`reading`]: fixed binary meter record and its decoded form
//! - [`connection`]: header + ciphertext framing over a device connection
//! - [`config`]: TOML loading

pub mod config;
pub mod connection;
pub mod reading;
