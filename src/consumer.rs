//! In-process shard runtime
//!
//! Drives one processor copy per shard, each on its own scoped thread,
//! feeding batches of at most `max_records` in sequence order. Stands in for
//! a real stream client when running locally and in tests.

use std::thread;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{InitialPosition, WorkerConfig};
use crate::processor::{Checkpointer, RecordProcessor, ShutdownReason};
use crate::record::Record;

/// Everything one shard will deliver during a run
#[derive(Debug, Clone)]
pub struct ShardFeed {
    pub shard_id: String,
    pub records: Vec<Record>,
}

impl ShardFeed {
    pub fn new(shard_id: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            shard_id: shard_id.into(),
            records,
        }
    }
}

/// Outcome of running one shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub shard_id: String,
    pub batches: usize,
    pub records: usize,
    pub errors: usize,
    /// The processor tore itself down before the end of the feed
    pub terminated: bool,
    pub checkpoint: Option<String>,
}

/// Checkpointer keeping progress in memory
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    last_delivered: Mutex<Option<String>>,
    checkpointed: Mutex<Option<String>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the last sequence number handed to the processor
    pub fn mark_delivered(&self, sequence_number: &str) {
        *self.last_delivered.lock() = Some(sequence_number.to_string());
    }

    pub fn checkpointed(&self) -> Option<String> {
        self.checkpointed.lock().clone()
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn checkpoint(&self) -> anyhow::Result<()> {
        let delivered = self.last_delivered.lock().clone();
        match delivered {
            Some(sequence_number) => self.checkpoint_at(&sequence_number),
            None => Ok(()),
        }
    }

    fn checkpoint_at(&self, sequence_number: &str) -> anyhow::Result<()> {
        *self.checkpointed.lock() = Some(sequence_number.to_string());
        debug!(sequence_number, "checkpoint");
        Ok(())
    }
}

pub struct ManagedConsumer {
    config: WorkerConfig,
    prototype: Box<dyn RecordProcessor>,
}

impl ManagedConsumer {
    pub fn new(config: WorkerConfig, prototype: Box<dyn RecordProcessor>) -> Self {
        Self { config, prototype }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run every shard to the end of its feed, in parallel
    pub fn run(&self, shards: Vec<ShardFeed>) -> anyhow::Result<Vec<ShardSummary>> {
        info!(
            stream = %self.config.stream_name,
            application = %self.config.application_name,
            region = self.config.region.as_deref().unwrap_or("-"),
            environment = self.config.environment.as_deref().unwrap_or("-"),
            shards = shards.len(),
            "starting consumer"
        );

        let processors = shards
            .iter()
            .map(|_| self.prototype.copy())
            .collect::<anyhow::Result<Vec<_>>>()?;

        let max_records = self.config.max_records;
        let position = self.config.initial_position;

        let summaries = thread::scope(|scope| {
            let handles: Vec<_> = shards
                .into_iter()
                .zip(processors)
                .map(|(feed, processor)| {
                    scope.spawn(move || run_shard(feed, processor, max_records, position))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join())
                .collect::<Vec<_>>()
        });

        summaries
            .into_iter()
            .map(|r| r.map_err(|_| anyhow::anyhow!("shard worker panicked")))
            .collect()
    }
}

fn run_shard(
    feed: ShardFeed,
    mut processor: Box<dyn RecordProcessor>,
    max_records: usize,
    position: InitialPosition,
) -> ShardSummary {
    let ShardFeed { shard_id, records } = feed;
    let checkpointer = MemoryCheckpointer::new();
    let mut summary = ShardSummary {
        shard_id: shard_id.clone(),
        ..Default::default()
    };

    processor.initialize(&shard_id);

    let records = match position {
        InitialPosition::TrimHorizon => records,
        InitialPosition::Latest => {
            if !records.is_empty() {
                debug!(shard_id = %shard_id, skipped = records.len(), "starting at LATEST");
            }
            Vec::new()
        }
    };

    let mut pending = records.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<Record> = pending
            .by_ref()
            .take(max_records)
            .map(|r| match r.approximate_arrival {
                Some(_) => r,
                None => r.with_arrival(Utc::now()),
            })
            .collect();

        if let Some(last) = batch.last() {
            checkpointer.mark_delivered(&last.sequence_number);
        }
        summary.batches += 1;
        summary.records += batch.len();

        if let Err(e) = processor.process_records(batch, &checkpointer) {
            summary.errors += 1;
            error!(shard_id = %shard_id, error = %e, "record processor failed on batch");
        }

        if processor.is_terminated() {
            summary.terminated = true;
            break;
        }
    }

    if summary.terminated {
        let undelivered = pending.count();
        warn!(
            shard_id = %shard_id,
            undelivered,
            checkpoint = checkpointer.checkpointed().as_deref().unwrap_or("-"),
            "processor terminated, shard stopped"
        );
    } else {
        processor.shutdown(&checkpointer, ShutdownReason::Terminate);
    }
    summary.checkpoint = checkpointer.checkpointed();

    if summary.errors > 0 {
        warn!(shard_id = %shard_id, errors = summary.errors, "shard finished with processing errors");
    }
    info!(shard_id = %shard_id, batches = summary.batches, records = summary.records, "shard finished");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CryptoCodec;
    use crate::decorator::DecryptingProcessor;
    use crate::registry::LoggingProcessor;
    use std::sync::Arc;

    fn config(max_records: usize) -> WorkerConfig {
        WorkerConfig {
            stream_name: "orders".into(),
            application_name: "orders-consumer".into(),
            processor: "logging".into(),
            region: None,
            max_records,
            environment: None,
            initial_position: InitialPosition::TrimHorizon,
            encryption: None,
        }
    }

    #[test]
    fn test_shard_stops_at_contained_failure() {
        let codec = Arc::new(CryptoCodec::builder("key-a").build().unwrap());
        let records = vec![
            Record::new("1", "pk", codec.encrypt_value("ok1").unwrap()),
            Record::new("2", "pk", "corrupt"),
            Record::new("3", "pk", codec.encrypt_value("after").unwrap()),
        ];
        let prototype = DecryptingProcessor::new(Box::new(LoggingProcessor::default()), codec);
        let consumer = ManagedConsumer::new(config(1), Box::new(prototype));

        let summaries = consumer.run(vec![ShardFeed::new("shard-0", records)]).unwrap();

        assert_eq!(
            summaries,
            vec![ShardSummary {
                shard_id: "shard-0".into(),
                batches: 2,
                records: 2,
                errors: 0,
                terminated: true,
                checkpoint: Some("1".into()),
            }]
        );
    }

    #[test]
    fn test_checkpoint_uses_last_delivered() {
        let checkpointer = MemoryCheckpointer::new();
        checkpointer.checkpoint().unwrap();
        assert_eq!(checkpointer.checkpointed(), None);

        checkpointer.mark_delivered("42");
        checkpointer.checkpoint().unwrap();
        assert_eq!(checkpointer.checkpointed().as_deref(), Some("42"));

        checkpointer.checkpoint_at("7").unwrap();
        assert_eq!(checkpointer.checkpointed().as_deref(), Some("7"));
    }
}
