//! Per-device key derivation and cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use hmac::Hmac;
use log::debug;
use sha2::Sha256;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const PBKDF2_ROUNDS: u32 = 100_000;
const PASSWORD_PREFIX: &str = "smart_meter_";

/// AES-256 key bound to one device id.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey([u8; KEY_LEN]);

impl DeviceKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}

/// Device id right-padded with ASCII '0' (or truncated) to 16 bytes.
pub fn device_salt(device_id: &str) -> [u8; SALT_LEN] {
    let mut salt = [b'0'; SALT_LEN];
    let id = device_id.as_bytes();
    let n = id.len().min(SALT_LEN);
    salt[..n].copy_from_slice(&id[..n]);
    salt
}

/// PBKDF2-HMAC-SHA256 over `"smart_meter_" + device_id`.
pub fn derive_key(device_id: &str) -> Result<DeviceKey, CryptoError> {
    let password = format!("{PASSWORD_PREFIX}{device_id}");
    let salt = device_salt(device_id);
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(DeviceKey(key))
}

/// Lazily derived, never evicted device keys.
///
/// Hits take the shared lock. A miss takes the exclusive lock and checks
/// again before deriving, so each device pays for PBKDF2 at most once.
#[derive(Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<String, Arc<DeviceKey>>>,
    derivations: AtomicU64,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_key(&self, device_id: &str) -> Result<Arc<DeviceKey>, CryptoError> {
        {
            let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(key) = keys.get(device_id) {
                return Ok(Arc::clone(key));
            }
        }

        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = keys.get(device_id) {
            return Ok(Arc::clone(key));
        }

        let key = Arc::new(derive_key(device_id)?);
        self.derivations.fetch_add(1, Ordering::Relaxed);
        keys.insert(device_id.to_string(), Arc::clone(&key));
        debug!("Derived key for {} ({} devices cached)", device_id, keys.len());

        Ok(key)
    }

    /// Number of PBKDF2 derivations performed so far.
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
