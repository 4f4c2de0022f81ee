//! Name → factory registry for record processors
//!
//! Configuration names a processor by string; the registry turns that
//! string into a fresh instance. Built-ins are registered by
//! [`ProcessorRegistry::with_builtins`].

use std::collections::BTreeMap;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::processor::{Checkpointer, RecordProcessor, ShutdownReason};
use crate::record::Record;

type Factory = Box<dyn Fn() -> Box<dyn RecordProcessor> + Send + Sync>;

pub struct ProcessorRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("logging", || Box::new(LoggingProcessor::default()));
        registry.register("stdout", || Box::new(StdoutProcessor::default()));
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn RecordProcessor> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn RecordProcessor>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProcessor {
                name: name.to_string(),
                known: self.names().join(", "),
            })?;
        Ok(factory())
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Logs record metadata and checkpoints after every batch
#[derive(Debug, Default)]
pub struct LoggingProcessor {
    shard_id: String,
    records_seen: u64,
}

impl RecordProcessor for LoggingProcessor {
    fn initialize(&mut self, shard_id: &str) {
        self.shard_id = shard_id.to_string();
        info!(shard_id, "logging processor initialized");
    }

    fn process_records(&mut self, records: Vec<Record>, checkpointer: &dyn Checkpointer) -> anyhow::Result<()> {
        for record in &records {
            debug!(
                shard_id = %self.shard_id,
                sequence_number = %record.sequence_number,
                partition_key = %record.partition_key,
                bytes = record.data.len(),
                "record"
            );
        }
        self.records_seen += records.len() as u64;
        info!(shard_id = %self.shard_id, batch = records.len(), total = self.records_seen, "processed batch");
        checkpointer.checkpoint()
    }

    fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        info!(shard_id = %self.shard_id, %reason, total = self.records_seen, "logging processor shut down");
        if reason == ShutdownReason::Terminate {
            if let Err(e) = checkpointer.checkpoint() {
                warn!(shard_id = %self.shard_id, error = %e, "final checkpoint failed");
            }
        }
    }

    fn copy(&self) -> anyhow::Result<Box<dyn RecordProcessor>> {
        Ok(Box::new(Self::default()))
    }
}

/// Writes each payload as one line on stdout
#[derive(Debug, Default)]
pub struct StdoutProcessor {
    shard_id: String,
}

impl RecordProcessor for StdoutProcessor {
    fn initialize(&mut self, shard_id: &str) {
        self.shard_id = shard_id.to_string();
    }

    fn process_records(&mut self, records: Vec<Record>, checkpointer: &dyn Checkpointer) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for record in &records {
            writeln!(out, "{}", String::from_utf8_lossy(&record.data))?;
        }
        out.flush()?;
        checkpointer.checkpoint()
    }

    fn shutdown(&mut self, _checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        debug!(shard_id = %self.shard_id, %reason, "stdout processor shut down");
    }

    fn copy(&self) -> anyhow::Result<Box<dyn RecordProcessor>> {
        Ok(Box::new(Self::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["logging", "stdout"]);
        assert!(registry.create("logging").is_ok());
    }

    #[test]
    fn test_unknown_processor() {
        let registry = ProcessorRegistry::with_builtins();
        match registry.create("com.example.Missing") {
            Err(ConfigError::UnknownProcessor { name, known }) => {
                assert_eq!(name, "com.example.Missing");
                assert_eq!(known, "logging, stdout");
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_register_custom() {
        let mut registry = ProcessorRegistry::new();
        registry.register("quiet", || Box::new(LoggingProcessor::default()));
        assert_eq!(registry.names(), vec!["quiet"]);
        assert!(registry.create("logging").is_err());
    }
}
