use thiserror::Error;

/// Errors returned by the event queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down; no more events are accepted or delivered.
    #[error("Event queue is closed")]
    Closed,

    /// The producer failed and tore the queue down.
    #[error("Producer failed: {0}")]
    ProducerFailed(String),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

impl QueueError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueError::Closed | QueueError::ProducerFailed(_))
    }
}

/// Errors raised by source connections.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to source: {0}")]
    Connect(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Transaction operation '{operation}' failed: {reason}")]
    Transaction {
        operation: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Failed to save offset: {0}")]
    SaveOffset(String),

    #[error("Failed to load offset: {0}")]
    LoadOffset(String),

    #[error("Failed to flush state store: {0}")]
    Flush(String),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Errors raised while resolving the starting offsets of a task.
#[derive(Error, Debug)]
pub enum OffsetError {
    #[error("No partition was provided for the task")]
    NoPartition,

    #[error("Expected a single partition, found {0}")]
    MultiplePartitions(usize),

    #[error("Failed to load previous offset: {0}")]
    Store(#[from] StateStoreError),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema history storage error: {0}")]
    Storage(String),

    #[error("Schema history is closed")]
    Closed,

    #[error("Failed to recover schema at {position}: {reason}")]
    Recovery { position: String, reason: String },

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
