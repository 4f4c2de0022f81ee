//! The record-processing contract shared by business logic and decorators

use crate::record::Record;

/// Why a processor is being shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// Lease lost to another worker; do not checkpoint
    Zombie,
    /// Processing of this shard is over (shard end, or a fatal decrypt failure)
    Terminate,
    /// The application asked to stop
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Zombie => write!(f, "ZOMBIE"),
            ShutdownReason::Terminate => write!(f, "TERMINATE"),
            ShutdownReason::Requested => write!(f, "REQUESTED"),
        }
    }
}

/// Progress tracking for one shard, owned by the runtime
pub trait Checkpointer: Send + Sync {
    /// Checkpoint at the last record delivered to the processor
    fn checkpoint(&self) -> anyhow::Result<()>;

    /// Checkpoint at a specific sequence number
    fn checkpoint_at(&self, sequence_number: &str) -> anyhow::Result<()>;
}

/// Per-shard record processor.
///
/// The runtime gives every shard its own instance via [`copy`](Self::copy)
/// and calls it from a single thread; implementations need not be `Sync`.
pub trait RecordProcessor: Send {
    fn initialize(&mut self, shard_id: &str);

    fn process_records(&mut self, records: Vec<Record>, checkpointer: &dyn Checkpointer) -> anyhow::Result<()>;

    fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason);

    /// A fresh instance safe to run on another shard concurrently with this one
    fn copy(&self) -> anyhow::Result<Box<dyn RecordProcessor>>;

    /// True once the processor has torn itself down and must not be fed again.
    /// The runtime stops delivering to the shard when this turns true.
    fn is_terminated(&self) -> bool {
        false
    }
}
