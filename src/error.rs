//! Error types for the envelope primitive, the record codec and bootstrap configuration

use thiserror::Error;

/// Result type alias for envelope primitive operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Failures raised by the envelope-encryption primitive and its key providers
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// No master key available for the request
    #[error("Master key not found: {0}")]
    KeyNotFound(String),

    /// The message could not be parsed before any cryptography ran
    #[error("Malformed envelope message: {0}")]
    MalformedMessage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Serialization(err.to_string())
    }
}

/// Failures surfaced by [`CryptoCodec`](crate::codec::CryptoCodec) calls.
///
/// `InvalidKey` and `ContextMismatch` mean the primitive decrypted the data
/// but the result failed verification; they are security relevant and must
/// never be ignored.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Encryption failed")]
    EncryptionFailure(#[source] EnvelopeError),

    #[error("Decryption failed")]
    DecryptionPrimitiveFailure(#[source] EnvelopeError),

    #[error("Supplied key {expected} not used to encrypt received data (provenance: {found:?})")]
    InvalidKey {
        expected: String,
        found: Option<String>,
    },

    #[error("Encryption context mismatch on \"{key}\": expected {expected:?}, found {found:?}")]
    ContextMismatch {
        key: String,
        expected: String,
        found: Option<String>,
    },
}

impl CodecError {
    /// Whether the failure came from verification of an otherwise successful decryption
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            CodecError::InvalidKey { .. } | CodecError::ContextMismatch { .. }
        )
    }
}

/// Bootstrap configuration failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for {param}: {reason}")]
    InvalidParameter { param: &'static str, reason: String },

    #[error("Encryption context is not a valid string map: {0}")]
    EncryptionContext(String),

    #[error("Unknown record processor \"{name}\" (known: {known})")]
    UnknownProcessor { name: String, known: String },
}
