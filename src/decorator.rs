//! Processor decorators that run the codec in front of business logic.
//!
//! A codec failure is contained here: instead of surfacing to the runtime's
//! poll loop, it becomes a `Terminate` shutdown of the wrapped processor.
//! That teardown is final. Later batches are refused, later shutdowns are
//! not forwarded, and [`RecordProcessor::is_terminated`] reports it to the
//! runtime. Errors raised by the wrapped processor itself propagate untouched.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::codec::CryptoCodec;
use crate::processor::{Checkpointer, RecordProcessor, ShutdownReason};
use crate::record::Record;

/// Handed to the wrapped processor while a failed batch is contained.
///
/// The runtime has already marked that batch delivered, so a checkpoint taken
/// now would record unprocessed records as done.
struct HeldCheckpointer;

impl Checkpointer for HeldCheckpointer {
    fn checkpoint(&self) -> anyhow::Result<()> {
        anyhow::bail!("checkpoint refused: the last batch was never processed")
    }

    fn checkpoint_at(&self, sequence_number: &str) -> anyhow::Result<()> {
        anyhow::bail!("checkpoint at {} refused: the last batch was never processed", sequence_number)
    }
}

fn refuse_after_termination(shard_id: Option<&str>, count: usize) -> anyhow::Result<()> {
    anyhow::bail!(
        "processor for shard {} was terminated after a codec failure; {} records not delivered",
        shard_id.unwrap_or("-"),
        count
    )
}

/// Decrypts each batch before handing it to the wrapped processor
pub struct DecryptingProcessor {
    processor: Box<dyn RecordProcessor>,
    codec: Arc<CryptoCodec>,
    shard_id: Option<String>,
    terminated: bool,
}

impl DecryptingProcessor {
    pub fn new(processor: Box<dyn RecordProcessor>, codec: Arc<CryptoCodec>) -> Self {
        Self {
            processor,
            codec,
            shard_id: None,
            terminated: false,
        }
    }

    pub fn codec(&self) -> &Arc<CryptoCodec> {
        &self.codec
    }

    /// New decorator over a copy of the wrapped processor, sharing this codec
    pub fn copy_decorator(&self) -> anyhow::Result<Self> {
        Ok(Self::new(self.processor.copy()?, Arc::clone(&self.codec)))
    }
}

impl RecordProcessor for DecryptingProcessor {
    fn initialize(&mut self, shard_id: &str) {
        self.shard_id = Some(shard_id.to_string());
        self.processor.initialize(shard_id);
    }

    fn process_records(&mut self, records: Vec<Record>, checkpointer: &dyn Checkpointer) -> anyhow::Result<()> {
        let count = records.len();
        if self.is_terminated() {
            return refuse_after_termination(self.shard_id.as_deref(), count);
        }

        match self.codec.decrypt_batch(records) {
            Ok(decrypted) => self.processor.process_records(decrypted, checkpointer),
            Err(e) => {
                error!(
                    shard_id = self.shard_id.as_deref().unwrap_or("-"),
                    key_id = self.codec.key_id(),
                    batch_size = count,
                    error = %e,
                    "batch decryption failed, shutting down processor"
                );
                self.terminated = true;
                self.processor.shutdown(&HeldCheckpointer, ShutdownReason::Terminate);
                Ok(())
            }
        }
    }

    fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        if self.terminated {
            debug!(
                shard_id = self.shard_id.as_deref().unwrap_or("-"),
                %reason,
                "processor already terminated, shutdown not forwarded"
            );
            return;
        }
        info!(
            shard_id = self.shard_id.as_deref().unwrap_or("-"),
            %reason,
            "shutting down decrypting processor"
        );
        self.processor.shutdown(checkpointer, reason);
    }

    fn copy(&self) -> anyhow::Result<Box<dyn RecordProcessor>> {
        Ok(Box::new(self.copy_decorator()?))
    }

    fn is_terminated(&self) -> bool {
        self.terminated || self.processor.is_terminated()
    }
}

/// Encrypts each batch before handing it to the wrapped processor.
///
/// Used on the producing side of a pipeline, e.g. in front of a processor
/// that forwards records to another stream.
pub struct EncryptingProcessor {
    processor: Box<dyn RecordProcessor>,
    codec: Arc<CryptoCodec>,
    shard_id: Option<String>,
    terminated: bool,
}

impl EncryptingProcessor {
    pub fn new(processor: Box<dyn RecordProcessor>, codec: Arc<CryptoCodec>) -> Self {
        Self {
            processor,
            codec,
            shard_id: None,
            terminated: false,
        }
    }

    pub fn codec(&self) -> &Arc<CryptoCodec> {
        &self.codec
    }
}

impl RecordProcessor for EncryptingProcessor {
    fn initialize(&mut self, shard_id: &str) {
        self.shard_id = Some(shard_id.to_string());
        self.processor.initialize(shard_id);
    }

    fn process_records(&mut self, records: Vec<Record>, checkpointer: &dyn Checkpointer) -> anyhow::Result<()> {
        if self.is_terminated() {
            return refuse_after_termination(self.shard_id.as_deref(), records.len());
        }

        match self.codec.encrypt_batch(records) {
            Ok(encrypted) => self.processor.process_records(encrypted, checkpointer),
            Err(e) => {
                error!(
                    shard_id = self.shard_id.as_deref().unwrap_or("-"),
                    key_id = self.codec.key_id(),
                    error = %e,
                    "batch encryption failed, shutting down processor"
                );
                self.terminated = true;
                self.processor.shutdown(&HeldCheckpointer, ShutdownReason::Terminate);
                Ok(())
            }
        }
    }

    fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        if self.terminated {
            return;
        }
        self.processor.shutdown(checkpointer, reason);
    }

    fn copy(&self) -> anyhow::Result<Box<dyn RecordProcessor>> {
        Ok(Box::new(Self::new(self.processor.copy()?, Arc::clone(&self.codec))))
    }

    fn is_terminated(&self) -> bool {
        self.terminated || self.processor.is_terminated()
    }
}
