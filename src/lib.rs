pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod crypto;
pub mod decorator;
pub mod envelope;
pub mod error;
pub mod key_provider;
pub mod processor;
pub mod record;
pub mod registry;

pub use codec::{CryptoCodec, CryptoCodecBuilder};
pub use config::{EncryptionConfig, InitialPosition, WorkerConfig};
pub use consumer::{ManagedConsumer, MemoryCheckpointer, ShardFeed, ShardSummary};
pub use crypto::{AesGcmCipher, SecureKey, AES_256_KEY_SIZE, NONCE_SIZE};
pub use decorator::{DecryptingProcessor, EncryptingProcessor};
pub use envelope::{DecryptResult, EncryptedMessage, EncryptionContext, EnvelopeCrypto};
pub use error::{CodecError, ConfigError, EnvelopeError, Result};
pub use key_provider::{EncryptedDataKey, InMemoryKeyProvider, MasterKeyProvider};
pub use processor::{Checkpointer, RecordProcessor, ShutdownReason};
pub use record::Record;
pub use registry::ProcessorRegistry;

pub mod prelude {
    pub use crate::codec::CryptoCodec;
    pub use crate::decorator::DecryptingProcessor;
    pub use crate::envelope::EncryptionContext;
    pub use crate::error::CodecError;
    pub use crate::key_provider::{InMemoryKeyProvider, MasterKeyProvider};
    pub use crate::processor::{Checkpointer, RecordProcessor, ShutdownReason};
    pub use crate::record::Record;
}
