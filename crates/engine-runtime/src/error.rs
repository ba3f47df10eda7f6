use engine_config::SettingsError;
use engine_core::error::{ConnectionError, OffsetError, QueueError, SchemaError, StateStoreError};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the task lifecycle controller.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The configuration was rejected; nothing was opened.
    #[error("Invalid configuration: {0}")]
    Config(#[from] SettingsError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Schema history error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Offset resolution failed: {0}")]
    Offsets(#[from] OffsetError),

    #[error("Offset store error: {0}")]
    Store(#[from] StateStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The connector could not build one of its collaborators.
    #[error("Connector error: {0}")]
    Connector(#[source] BoxError),

    #[error("Cannot {operation} a task in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Streaming stopped because of a fatal producer failure.
    #[error("Task failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}
