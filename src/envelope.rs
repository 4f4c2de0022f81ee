use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::crypto::{AesGcmCipher, Sealed, SecureKey};
use crate::error::{EnvelopeError, Result};
use crate::key_provider::{EncryptedDataKey, MasterKeyProvider};

/// Wire format version written by [`EnvelopeCrypto::encrypt`]
pub const MESSAGE_VERSION: u8 = 1;

/// Non-secret key/value metadata bound to a ciphertext.
///
/// Ordering is irrelevant to its meaning; a sorted map keeps the bound
/// AAD canonical.
pub type EncryptionContext = BTreeMap<String, String>;

/// Envelope encryption: a fresh data key per message, wrapped under a master key
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCrypto;

/// Everything a successful decryption recovers
#[derive(Debug, Clone)]
pub struct DecryptResult {
    pub plaintext: Vec<u8>,
    /// Master key ids that took part in the decryption, primary first
    pub master_key_ids: Vec<String>,
    pub encryption_context: EncryptionContext,
}

impl EnvelopeCrypto {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt `plaintext` under a new data key wrapped by master key `key_id`
    pub fn encrypt(
        &self,
        provider: &dyn MasterKeyProvider,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String> {
        let message_id = Uuid::new_v4();
        let aad = message_aad(&message_id, context)?;

        let data_key = SecureKey::generate();
        let edk = provider.wrap_data_key(key_id, &data_key, &aad)?;
        let body = AesGcmCipher::seal(&data_key, plaintext, &aad)?;

        let message = EncryptedMessage {
            version: MESSAGE_VERSION,
            message_id,
            encryption_context: context.clone(),
            encrypted_data_keys: vec![edk],
            nonce: body.nonce,
            ciphertext: body.ciphertext,
        };
        trace!(%message_id, key_id, "sealed envelope message");

        message.to_transport()
    }

    /// Decrypt a transport-encoded message with whichever listed key the provider holds
    pub fn decrypt(&self, provider: &dyn MasterKeyProvider, ciphertext: &str) -> Result<DecryptResult> {
        let message = EncryptedMessage::from_transport(ciphertext)?;
        let aad = message_aad(&message.message_id, &message.encryption_context)?;

        let edk = message
            .encrypted_data_keys
            .iter()
            .find(|edk| provider.has_key(&edk.key_id))
            .ok_or_else(|| {
                let listed: Vec<_> = message
                    .encrypted_data_keys
                    .iter()
                    .map(|edk| edk.key_id.as_str())
                    .collect();
                EnvelopeError::KeyNotFound(format!("no provider key for [{}]", listed.join(", ")))
            })?;

        let data_key = provider.unwrap_data_key(edk, &aad)?;
        let body = Sealed {
            nonce: message.nonce,
            ciphertext: message.ciphertext,
        };
        let plaintext = AesGcmCipher::open(&data_key, &body, &aad)?;

        Ok(DecryptResult {
            plaintext,
            master_key_ids: vec![edk.key_id.clone()],
            encryption_context: message.encryption_context,
        })
    }
}

/// AAD shared by the data-key wrap and the body: message id plus canonical context JSON
fn message_aad(message_id: &Uuid, context: &EncryptionContext) -> Result<Vec<u8>> {
    let mut aad = message_id.as_bytes().to_vec();
    aad.extend_from_slice(&serde_json::to_vec(context)?);
    Ok(aad)
}

/// The serialized envelope carried as a record payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub version: u8,
    pub message_id: Uuid,
    pub encryption_context: EncryptionContext,
    pub encrypted_data_keys: Vec<EncryptedDataKey>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(EnvelopeError::from)
    }

    /// Base64 of the JSON form: printable, single line
    pub fn to_transport(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_json()?))
    }

    pub fn from_transport(encoded: &str) -> Result<Self> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|e| EnvelopeError::MalformedMessage(format!("base64: {}", e)))?;

        let message: Self = serde_json::from_slice(&json)
            .map_err(|e| EnvelopeError::MalformedMessage(format!("message body: {}", e)))?;

        if message.version != MESSAGE_VERSION {
            return Err(EnvelopeError::MalformedMessage(format!(
                "unsupported version {}",
                message.version
            )));
        }
        if message.encrypted_data_keys.is_empty() {
            return Err(EnvelopeError::MalformedMessage("no encrypted data keys".into()));
        }
        Ok(message)
    }
}

/// Serde adapter storing byte fields as standard base64 strings
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    fn context(pairs: &[(&str, &str)]) -> EncryptionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        let ctx = context(&[("env", "prod")]);

        let ciphertext = EnvelopeCrypto.encrypt(&provider, "key-a", b"hello", &ctx).unwrap();
        let result = EnvelopeCrypto.decrypt(&provider, &ciphertext).unwrap();

        assert_eq!(result.plaintext, b"hello");
        assert_eq!(result.master_key_ids, vec!["key-a".to_string()]);
        assert_eq!(result.encryption_context, ctx);
    }

    #[test]
    fn test_ciphertext_is_single_line_text() {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        let ciphertext = EnvelopeCrypto
            .encrypt(&provider, "key-a", b"line one\nline two", &EncryptionContext::new())
            .unwrap();
        assert!(!ciphertext.contains('\n'));
    }

    #[test]
    fn test_tampered_context_fails() {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        let ciphertext = EnvelopeCrypto
            .encrypt(&provider, "key-a", b"hello", &context(&[("env", "staging")]))
            .unwrap();

        let mut message = EncryptedMessage::from_transport(&ciphertext).unwrap();
        message
            .encryption_context
            .insert("env".into(), "prod".into());
        let forged = message.to_transport().unwrap();

        assert!(matches!(
            EnvelopeCrypto.decrypt(&provider, &forged),
            Err(EnvelopeError::Crypto(_))
        ));
    }

    #[test]
    fn test_unknown_key() {
        let producer = InMemoryKeyProvider::with_generated_key("key-a");
        let consumer = InMemoryKeyProvider::with_generated_key("key-b");
        let ciphertext = EnvelopeCrypto
            .encrypt(&producer, "key-a", b"hello", &EncryptionContext::new())
            .unwrap();

        assert!(matches!(
            EnvelopeCrypto.decrypt(&consumer, &ciphertext),
            Err(EnvelopeError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_transport() {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        for bad in ["not base64 !!", "aGVsbG8=", ""] {
            assert!(matches!(
                EnvelopeCrypto.decrypt(&provider, bad),
                Err(EnvelopeError::MalformedMessage(_))
            ));
        }
    }

    #[test]
    fn test_unsupported_version() {
        let provider = InMemoryKeyProvider::with_generated_key("key-a");
        let ciphertext = EnvelopeCrypto
            .encrypt(&provider, "key-a", b"hello", &EncryptionContext::new())
            .unwrap();
        let mut message = EncryptedMessage::from_transport(&ciphertext).unwrap();
        message.version = 9;
        let encoded = STANDARD.encode(message.to_json().unwrap());

        assert!(matches!(
            EnvelopeCrypto.decrypt(&provider, &encoded),
            Err(EnvelopeError::MalformedMessage(_))
        ));
    }
}
