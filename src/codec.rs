//! Record codec: envelope encryption with key provenance and context checks
//!
//! A [`CryptoCodec`] is built once at bootstrap and shared by reference
//! across every shard's processor. It holds no mutable state, so concurrent
//! calls from different shards are safe.

use std::sync::Arc;

use tracing::debug;

use crate::envelope::{EncryptionContext, EnvelopeCrypto};
use crate::error::{CodecError, ConfigError, EnvelopeError};
use crate::key_provider::{InMemoryKeyProvider, MasterKeyProvider};
use crate::record::Record;

/// Builder for [`CryptoCodec`]; configuration is frozen by [`build`](Self::build)
pub struct CryptoCodecBuilder {
    key_id: String,
    encryption_context: EncryptionContext,
    validate_encryption_context: bool,
    key_provider: Option<Arc<dyn MasterKeyProvider>>,
}

impl CryptoCodecBuilder {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            encryption_context: EncryptionContext::new(),
            validate_encryption_context: true,
            key_provider: None,
        }
    }

    pub fn encryption_context(mut self, context: EncryptionContext) -> Self {
        self.encryption_context = context;
        self
    }

    pub fn validate_encryption_context(mut self, validate: bool) -> Self {
        self.validate_encryption_context = validate;
        self
    }

    /// Use `provider` instead of one generated for the key id
    pub fn key_provider(mut self, provider: Arc<dyn MasterKeyProvider>) -> Self {
        self.key_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<CryptoCodec, ConfigError> {
        if self.key_id.trim().is_empty() {
            return Err(ConfigError::MissingParameter("key identifier"));
        }

        let key_provider = match self.key_provider {
            Some(provider) => provider,
            None => Arc::new(InMemoryKeyProvider::with_generated_key(&self.key_id)),
        };

        Ok(CryptoCodec {
            key_id: self.key_id,
            encryption_context: self.encryption_context,
            validate_encryption_context: self.validate_encryption_context,
            key_provider,
            crypto: EnvelopeCrypto::new(),
        })
    }
}

/// Encrypts and decrypts record payloads under one configured master key
pub struct CryptoCodec {
    key_id: String,
    encryption_context: EncryptionContext,
    validate_encryption_context: bool,
    key_provider: Arc<dyn MasterKeyProvider>,
    crypto: EnvelopeCrypto,
}

impl CryptoCodec {
    pub fn builder(key_id: impl Into<String>) -> CryptoCodecBuilder {
        CryptoCodecBuilder::new(key_id)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encryption_context(&self) -> &EncryptionContext {
        &self.encryption_context
    }

    pub fn validates_encryption_context(&self) -> bool {
        self.validate_encryption_context
    }

    pub fn key_provider(&self) -> &Arc<dyn MasterKeyProvider> {
        &self.key_provider
    }

    pub fn encrypt_value(&self, plaintext: &str) -> Result<String, CodecError> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<String, CodecError> {
        self.crypto
            .encrypt(
                self.key_provider.as_ref(),
                &self.key_id,
                plaintext,
                &self.encryption_context,
            )
            .map_err(CodecError::EncryptionFailure)
    }

    pub fn decrypt_value(&self, ciphertext: &str) -> Result<String, CodecError> {
        let plaintext = self.decrypt_bytes(ciphertext)?;
        String::from_utf8(plaintext).map_err(|e| {
            CodecError::DecryptionPrimitiveFailure(EnvelopeError::Crypto(format!(
                "plaintext is not UTF-8: {}",
                e
            )))
        })
    }

    /// Decrypt and verify one ciphertext.
    ///
    /// The primary provenance key must be exactly the configured key id;
    /// a message that merely decrypts under some other key the provider
    /// happens to hold is rejected.
    pub fn decrypt_bytes(&self, ciphertext: &str) -> Result<Vec<u8>, CodecError> {
        let result = self
            .crypto
            .decrypt(self.key_provider.as_ref(), ciphertext)
            .map_err(|e| match e {
                EnvelopeError::MalformedMessage(reason) => CodecError::MalformedCiphertext(reason),
                other => CodecError::DecryptionPrimitiveFailure(other),
            })?;

        match result.master_key_ids.first() {
            Some(primary) if *primary == self.key_id => {}
            primary => {
                return Err(CodecError::InvalidKey {
                    expected: self.key_id.clone(),
                    found: primary.cloned(),
                })
            }
        }

        if self.validate_encryption_context {
            self.verify_context(&result.encryption_context)?;
        }

        Ok(result.plaintext)
    }

    /// Every expected pair must be present verbatim; extra recovered keys are fine
    fn verify_context(&self, recovered: &EncryptionContext) -> Result<(), CodecError> {
        for (key, expected) in &self.encryption_context {
            let found = recovered.get(key);
            if found != Some(expected) {
                return Err(CodecError::ContextMismatch {
                    key: key.clone(),
                    expected: expected.clone(),
                    found: found.cloned(),
                });
            }
        }
        Ok(())
    }

    pub fn encrypt_record(&self, record: Record) -> Result<Record, CodecError> {
        let ciphertext = self.encrypt_bytes(&record.data)?;
        Ok(record.with_data(ciphertext.into_bytes()))
    }

    pub fn decrypt_record(&self, record: Record) -> Result<Record, CodecError> {
        let plaintext = {
            let text = std::str::from_utf8(&record.data).map_err(|e| {
                CodecError::MalformedCiphertext(format!(
                    "record {} payload is not text: {}",
                    record.sequence_number, e
                ))
            })?;
            self.decrypt_bytes(text)?
        };
        Ok(record.with_data(plaintext))
    }

    /// Encrypt every payload in order; the first failure abandons the batch
    pub fn encrypt_batch(&self, records: Vec<Record>) -> Result<Vec<Record>, CodecError> {
        let count = records.len();
        let encrypted = records
            .into_iter()
            .map(|r| self.encrypt_record(r))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count, key_id = %self.key_id, "encrypted batch");
        Ok(encrypted)
    }

    /// Decrypt every payload in order; no partial batch is ever returned
    pub fn decrypt_batch(&self, records: Vec<Record>) -> Result<Vec<Record>, CodecError> {
        let count = records.len();
        let decrypted = records
            .into_iter()
            .map(|r| self.decrypt_record(r))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count, key_id = %self.key_id, "decrypted batch");
        Ok(decrypted)
    }
}

impl std::fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoCodec")
            .field("key_id", &self.key_id)
            .field("encryption_context", &self.encryption_context)
            .field("validate_encryption_context", &self.validate_encryption_context)
            .field("key_provider", &self.key_provider.provider_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> EncryptionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn shared_provider() -> Arc<InMemoryKeyProvider> {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        provider.insert_key("key-b", crate::crypto::SecureKey::generate());
        Arc::new(provider)
    }

    fn codec(key_id: &str, provider: &Arc<InMemoryKeyProvider>, context: EncryptionContext) -> CryptoCodec {
        CryptoCodec::builder(key_id)
            .encryption_context(context)
            .key_provider(provider.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_round_trip_default_provider() {
        let codec = CryptoCodec::builder("key-a")
            .encryption_context(ctx(&[("env", "prod")]))
            .build()
            .unwrap();
        let ciphertext = codec.encrypt_value("hello").unwrap();
        assert_ne!(ciphertext, "hello");
        assert_eq!(codec.decrypt_value(&ciphertext).unwrap(), "hello");
    }

    #[test]
    fn test_empty_key_id_rejected() {
        assert!(CryptoCodec::builder("  ").build().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let codec = CryptoCodec::builder("key-a").build().unwrap();
        assert!(codec.validates_encryption_context());
        assert!(codec.encryption_context().is_empty());
        assert_eq!(codec.key_id(), "key-a");
        assert!(codec.key_provider().has_key("key-a"));
    }

    #[test]
    fn test_invalid_key_provenance() {
        let provider = shared_provider();
        let producer = codec("key-a", &provider, EncryptionContext::new());
        let consumer = codec("key-b", &provider, EncryptionContext::new());

        let ciphertext = producer.encrypt_value("hello").unwrap();
        match consumer.decrypt_value(&ciphertext) {
            Err(CodecError::InvalidKey { expected, found }) => {
                assert_eq!(expected, "key-b");
                assert_eq!(found.as_deref(), Some("key-a"));
            }
            other => panic!("expected InvalidKey, got {:?}", other),
        }
    }

    #[test]
    fn test_context_superset_accepted() {
        let provider = shared_provider();
        let producer = codec("key-a", &provider, ctx(&[("env", "prod"), ("team", "x")]));
        let consumer = codec("key-a", &provider, ctx(&[("env", "prod")]));

        let ciphertext = producer.encrypt_value("hello").unwrap();
        assert_eq!(consumer.decrypt_value(&ciphertext).unwrap(), "hello");
    }

    #[test]
    fn test_context_value_mismatch() {
        let provider = shared_provider();
        let producer = codec("key-a", &provider, ctx(&[("env", "staging")]));
        let consumer = codec("key-a", &provider, ctx(&[("env", "prod")]));

        let ciphertext = producer.encrypt_value("hello").unwrap();
        let err = consumer.decrypt_value(&ciphertext).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ContextMismatch { ref key, ref found, .. }
                if key == "env" && found.as_deref() == Some("staging")
        ));
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_context_missing_key() {
        let provider = shared_provider();
        let producer = codec("key-a", &provider, ctx(&[("team", "x")]));
        let consumer = codec("key-a", &provider, ctx(&[("env", "prod")]));

        let ciphertext = producer.encrypt_value("hello").unwrap();
        assert!(matches!(
            consumer.decrypt_value(&ciphertext),
            Err(CodecError::ContextMismatch { found: None, .. })
        ));
    }

    #[test]
    fn test_validation_disabled() {
        let provider = shared_provider();
        let producer = codec("key-a", &provider, ctx(&[("env", "staging")]));
        let consumer = CryptoCodec::builder("key-a")
            .encryption_context(ctx(&[("env", "prod")]))
            .validate_encryption_context(false)
            .key_provider(provider.clone())
            .build()
            .unwrap();

        let ciphertext = producer.encrypt_value("hello").unwrap();
        assert_eq!(consumer.decrypt_value(&ciphertext).unwrap(), "hello");
    }

    #[test]
    fn test_unknown_master_key_is_primitive_failure() {
        let producer = CryptoCodec::builder("key-a").build().unwrap();
        let consumer = CryptoCodec::builder("key-a").build().unwrap();

        let ciphertext = producer.encrypt_value("hello").unwrap();
        assert!(matches!(
            consumer.decrypt_value(&ciphertext),
            Err(CodecError::DecryptionPrimitiveFailure(_))
        ));
    }

    #[test]
    fn test_encrypt_failure_when_provider_lacks_key() {
        let codec = CryptoCodec::builder("key-a")
            .key_provider(Arc::new(InMemoryKeyProvider::new()))
            .build()
            .unwrap();
        assert!(matches!(
            codec.encrypt_value("hello"),
            Err(CodecError::EncryptionFailure(EnvelopeError::KeyNotFound(_)))
        ));
    }

    #[test]
    fn test_non_utf8_record_payload() {
        let codec = CryptoCodec::builder("key-a").build().unwrap();
        let record = Record::new("1", "pk", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(
            codec.decrypt_record(record),
            Err(CodecError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_batch_preserves_order_and_fields() {
        let codec = CryptoCodec::builder("key-a").build().unwrap();
        let records = vec![
            Record::new("1", "pk-1", "a"),
            Record::new("2", "pk-2", "b"),
            Record::new("3", "pk-1", "c"),
        ];

        let encrypted = codec.encrypt_batch(records.clone()).unwrap();
        assert_eq!(encrypted.len(), 3);
        assert!(encrypted.iter().zip(&records).all(|(e, r)| e.data != r.data));

        let decrypted = codec.decrypt_batch(encrypted).unwrap();
        assert_eq!(decrypted, records);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let codec = CryptoCodec::builder("key-a").build().unwrap();
        let mut batch = codec
            .encrypt_batch(vec![
                Record::new("1", "pk", "a"),
                Record::new("2", "pk", "b"),
                Record::new("3", "pk", "c"),
            ])
            .unwrap();
        batch[1].data = b"%%% corrupt %%%".to_vec();

        assert!(matches!(
            codec.decrypt_batch(batch),
            Err(CodecError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_binary_payload_round_trip() {
        let codec = CryptoCodec::builder("key-a").build().unwrap();
        let record = Record::new("1", "pk", vec![0u8, 159, 146, 150, 255]);
        let encrypted = codec.encrypt_record(record.clone()).unwrap();
        assert_eq!(codec.decrypt_record(encrypted).unwrap(), record);
    }
}
