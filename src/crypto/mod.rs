//! # Payload Cryptography
//!
//! - [`key_store`]: PBKDF2 device keys, derived once and cached
//! - [`decryptor`]: deterministic-IV AES-256-CBC over single blocks

pub mod decryptor;
pub mod key_store;

pub use decryptor::{derive_iv, encrypt_block, Decryptor, CIPHERTEXT_LEN};
pub use key_store::{derive_key, DeviceKey, KeyStore};
