use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One polled stream item.
///
/// Only `data` is ever rewritten by this crate; the identifiers travel
/// through untouched for checkpointing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub sequence_number: String,
    pub partition_key: String,
    pub approximate_arrival: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(sequence_number: impl Into<String>, partition_key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            approximate_arrival: None,
            data: data.into(),
        }
    }

    pub fn with_arrival(mut self, at: DateTime<Utc>) -> Self {
        self.approximate_arrival = Some(at);
        self
    }

    /// Same record with its payload replaced
    pub fn with_data(self, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..self
        }
    }
}
