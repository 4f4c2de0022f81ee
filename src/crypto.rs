//! Cryptographic primitives used by the envelope format
//!
//! AES-256-GCM for both data-key wrapping and payload encryption, and
//! HKDF-SHA256 for deriving master keys from a shared seed.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EnvelopeError, Result};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Key material that zeroizes on drop and never prints itself
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: Vec<u8>,
}

impl SecureKey {
    /// Wrap existing key material; it is zeroized when the key is dropped
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate a new random AES-256 key
    pub fn generate() -> Self {
        let mut key = vec![0u8; AES_256_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Borrow the raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the key holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureKey([REDACTED])")
    }
}

/// Nonce plus ciphertext (auth tag appended) produced by one AES-GCM seal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// AES-256-GCM with mandatory additional authenticated data
pub struct AesGcmCipher;

impl AesGcmCipher {
    fn cipher(key: &SecureKey) -> Result<Aes256Gcm> {
        if key.len() != AES_256_KEY_SIZE {
            return Err(EnvelopeError::Crypto(format!(
                "Invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| EnvelopeError::Crypto(format!("Cipher init error: {}", e)))
    }

    /// Seal `plaintext` under `key` with a fresh random nonce, binding `aad`
    pub fn seal(key: &SecureKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        let cipher = Self::cipher(key)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad })
            .map_err(|e| EnvelopeError::Crypto(format!("Encryption error: {}", e)))?;

        Ok(Sealed {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        })
    }

    /// Open a sealed payload; fails on any tag, nonce or AAD mismatch
    pub fn open(key: &SecureKey, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Self::cipher(key)?;

        if sealed.nonce.len() != NONCE_SIZE {
            return Err(EnvelopeError::Crypto(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                sealed.nonce.len()
            )));
        }
        if sealed.ciphertext.len() < TAG_SIZE {
            return Err(EnvelopeError::Crypto("Ciphertext shorter than auth tag".into()));
        }

        cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad,
                },
            )
            .map_err(|_| EnvelopeError::Crypto("Decryption failed: authentication error".into()))
    }
}

/// HKDF-SHA256 master key derivation
pub struct KeyDerivation;

impl KeyDerivation {
    /// Derive the master key for `key_id` from a shared root seed.
    ///
    /// Processes configured with the same seed and key id derive the same
    /// key, which is what lets a producer and a consumer agree without a
    /// key service.
    pub fn derive_master_key(seed: &SecureKey, key_id: &str) -> Result<SecureKey> {
        let hkdf = Hkdf::<Sha256>::new(None, seed.as_bytes());
        let info = format!("envelope-stream:master-key:{}", key_id);

        let mut output = vec![0u8; AES_256_KEY_SIZE];
        hkdf.expand(info.as_bytes(), &mut output)
            .map_err(|e| EnvelopeError::Crypto(format!("Key derivation error: {}", e)))?;

        Ok(SecureKey::new(output))
    }
}
