//! AES-256-CBC payload decryption with the deterministic per-device IV.
//!
//! The IV is never sent. Both ends compute it as the first 16 bytes of
//! SHA-256(key || device_id), so every message from one device reuses the
//! same IV.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use super::key_store::{DeviceKey, KeyStore};
use crate::error::CryptoError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Devices always send exactly one AES block.
pub const CIPHERTEXT_LEN: usize = 16;
pub const IV_LEN: usize = 16;

pub fn derive_iv(key: &DeviceKey, device_id: &str) -> [u8; IV_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(device_id.as_bytes());
    let digest = hasher.finalize();

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&digest[..IV_LEN]);
    iv
}

/// Encrypt the way a device does: PKCS#7 pad, AES-256-CBC, derived IV.
pub fn encrypt_block(
    key: &DeviceKey,
    device_id: &str,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let iv = derive_iv(key, device_id);
    let cipher =
        Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv).map_err(|_| CryptoError::CipherInit)?;

    let padded_len = (plaintext.len() / CIPHERTEXT_LEN + 1) * CIPHERTEXT_LEN;
    let mut buf = vec![0u8; padded_len];
    buf[..plaintext.len()].copy_from_slice(plaintext);

    let ciphertext = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
        .map_err(|_| CryptoError::Padding)?;
    Ok(ciphertext.to_vec())
}

/// Decrypts device payloads using keys from a shared [`KeyStore`].
#[derive(Default)]
pub struct Decryptor {
    keys: KeyStore,
}

impl Decryptor {
    pub fn new(keys: KeyStore) -> Self {
        Self { keys }
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Recover the plaintext of one block. Length is checked before any key
    /// work so malformed frames never trigger a derivation.
    pub fn decrypt(&self, device_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() != CIPHERTEXT_LEN {
            return Err(CryptoError::InvalidLength {
                expected: CIPHERTEXT_LEN,
                actual: ciphertext.len(),
            });
        }

        let key = self.keys.get_or_create_key(device_id)?;
        let iv = derive_iv(&key, device_id);

        let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
            .map_err(|_| CryptoError::CipherInit)?;

        let mut block = [0u8; CIPHERTEXT_LEN];
        block.copy_from_slice(ciphertext);
        let plaintext = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut block)
            .map_err(|_| CryptoError::Padding)?;

        Ok(plaintext.to_vec())
    }
}
