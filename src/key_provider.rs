//! Master key providers
//!
//! A provider owns master keys by identifier and wraps/unwraps per-message
//! data keys under them. The envelope primitive never sees master key bytes.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::{AesGcmCipher, KeyDerivation, Sealed, SecureKey};
use crate::error::{EnvelopeError, Result};

/// Provider id written into every data key wrapped by [`InMemoryKeyProvider`]
pub const IN_MEMORY_PROVIDER_ID: &str = "in-memory";

/// A data key wrapped under one master key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDataKey {
    pub provider_id: String,
    pub key_id: String,
    #[serde(with = "crate::envelope::b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "crate::envelope::b64")]
    pub wrapped_key: Vec<u8>,
}

/// Capability to wrap and unwrap data keys under named master keys
pub trait MasterKeyProvider: Send + Sync {
    /// Identifier stamped on data keys this provider wraps
    fn provider_id(&self) -> &str;

    /// Whether this provider can unwrap data keys for `key_id`
    fn has_key(&self, key_id: &str) -> bool;

    /// Wrap `data_key` under master key `key_id`, binding `aad`
    fn wrap_data_key(&self, key_id: &str, data_key: &SecureKey, aad: &[u8]) -> Result<EncryptedDataKey>;

    /// Recover the data key from `edk`; `aad` must match the wrap call
    fn unwrap_data_key(&self, edk: &EncryptedDataKey, aad: &[u8]) -> Result<SecureKey>;
}

/// Provider keeping master keys in process memory.
///
/// Suitable for tests, local pipelines, and deployments where master keys
/// are derived from a seed distributed out of band.
pub struct InMemoryKeyProvider {
    keys: RwLock<HashMap<String, SecureKey>>,
}

impl InMemoryKeyProvider {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Provider holding one freshly generated master key named `key_id`
    pub fn with_generated_key(key_id: &str) -> Self {
        let provider = Self::new();
        provider.insert_key(key_id, SecureKey::generate());
        provider
    }

    /// Provider whose master keys are derived from `seed`, one per id
    pub fn from_seed<I, S>(seed: &SecureKey, key_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for key_id in key_ids {
            let key_id = key_id.as_ref();
            provider.insert_key(key_id, KeyDerivation::derive_master_key(seed, key_id)?);
        }
        Ok(provider)
    }

    /// Add or replace a master key
    pub fn insert_key(&self, key_id: &str, key: SecureKey) {
        self.keys.write().insert(key_id.to_string(), key);
    }

    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.keys.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyProvider")
            .field("key_ids", &self.key_ids())
            .finish()
    }
}

impl MasterKeyProvider for InMemoryKeyProvider {
    fn provider_id(&self) -> &str {
        IN_MEMORY_PROVIDER_ID
    }

    fn has_key(&self, key_id: &str) -> bool {
        self.keys.read().contains_key(key_id)
    }

    fn wrap_data_key(&self, key_id: &str, data_key: &SecureKey, aad: &[u8]) -> Result<EncryptedDataKey> {
        let keys = self.keys.read();
        let master = keys
            .get(key_id)
            .ok_or_else(|| EnvelopeError::KeyNotFound(key_id.to_string()))?;

        let sealed = AesGcmCipher::seal(master, data_key.as_bytes(), aad)?;

        Ok(EncryptedDataKey {
            provider_id: IN_MEMORY_PROVIDER_ID.to_string(),
            key_id: key_id.to_string(),
            nonce: sealed.nonce,
            wrapped_key: sealed.ciphertext,
        })
    }

    fn unwrap_data_key(&self, edk: &EncryptedDataKey, aad: &[u8]) -> Result<SecureKey> {
        if edk.provider_id != IN_MEMORY_PROVIDER_ID {
            return Err(EnvelopeError::KeyNotFound(format!(
                "{} (provider {})",
                edk.key_id, edk.provider_id
            )));
        }

        let keys = self.keys.read();
        let master = keys
            .get(&edk.key_id)
            .ok_or_else(|| EnvelopeError::KeyNotFound(edk.key_id.clone()))?;

        let sealed = Sealed {
            nonce: edk.nonce.clone(),
            ciphertext: edk.wrapped_key.clone(),
        };
        Ok(SecureKey::new(AesGcmCipher::open(master, &sealed, aad)?))
    }
}
