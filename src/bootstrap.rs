use std::sync::Arc;

use tracing::info;

use crate::codec::CryptoCodec;
use crate::config::{EncryptionConfig, WorkerConfig};
use crate::decorator::DecryptingProcessor;
use crate::error::ConfigError;
use crate::key_provider::{InMemoryKeyProvider, MasterKeyProvider};
use crate::processor::RecordProcessor;
use crate::registry::ProcessorRegistry;

/// Build the codec described by `encryption`.
///
/// An explicit `provider` wins; otherwise a seed yields a derived provider,
/// and without either the codec generates its own key.
pub fn build_codec(
    encryption: &EncryptionConfig,
    provider: Option<Arc<dyn MasterKeyProvider>>,
) -> Result<CryptoCodec, ConfigError> {
    let provider: Option<Arc<dyn MasterKeyProvider>> = match (provider, &encryption.master_key_seed) {
        (Some(provider), _) => Some(provider),
        (None, Some(seed)) => {
            let derived = InMemoryKeyProvider::from_seed(seed, [encryption.key_id.as_str()]).map_err(|e| {
                ConfigError::InvalidParameter {
                    param: crate::config::MASTER_KEY_SEED_PARAM,
                    reason: e.to_string(),
                }
            })?;
            Some(Arc::new(derived) as Arc<dyn MasterKeyProvider>)
        }
        (None, None) => None,
    };

    let mut builder = CryptoCodec::builder(encryption.key_id.clone())
        .encryption_context(encryption.context.clone())
        .validate_encryption_context(encryption.validate_context);
    if let Some(provider) = provider {
        builder = builder.key_provider(provider);
    }
    builder.build()
}

/// Instantiate the configured processor, wrapped for decryption when a key is set
pub fn build_processor(
    config: &WorkerConfig,
    registry: &ProcessorRegistry,
    provider: Option<Arc<dyn MasterKeyProvider>>,
) -> Result<Box<dyn RecordProcessor>, ConfigError> {
    let processor = registry.create(&config.processor)?;

    match &config.encryption {
        Some(encryption) => {
            let codec = Arc::new(build_codec(encryption, provider)?);
            info!(
                processor = %config.processor,
                key_id = %encryption.key_id,
                context_keys = encryption.context.len(),
                validate_context = encryption.validate_context,
                "records will be decrypted before processing"
            );
            Ok(Box::new(DecryptingProcessor::new(processor, codec)))
        }
        None => {
            info!(processor = %config.processor, "records will be processed as received");
            Ok(processor)
        }
    }
}
