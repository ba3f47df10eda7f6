use engine_core::{
    error::{QueueError, SchemaError},
    retry::RetryDisposition,
};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a source reader.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Connectivity or similar failure that may succeed when retried.
    #[error("Transient source failure: {0}")]
    Transient(#[source] BoxError),

    /// The stream cannot continue.
    #[error("Fatal source failure: {0}")]
    Fatal(#[source] BoxError),
}

impl ReaderError {
    pub fn transient(e: impl Into<BoxError>) -> Self {
        ReaderError::Transient(e.into())
    }

    pub fn fatal(e: impl Into<BoxError>) -> Self {
        ReaderError::Fatal(e.into())
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            ReaderError::Transient(_) => RetryDisposition::Retry,
            ReaderError::Fatal(_) => RetryDisposition::Stop,
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to apply schema change to '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: SchemaError,
    },
}

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Failed to read signals: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signal channel '{channel}' failed: {reason}")]
    Channel { channel: String, reason: String },
}

/// Reasons the streaming loop ended abnormally.
#[derive(Error, Debug)]
pub enum StreamingError {
    #[error("Failed to position reader: {0}")]
    Open(#[source] ReaderError),

    #[error("Source read failed: {0}")]
    Read(#[source] ReaderError),

    #[error("Source read failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: ReaderError,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Failed to publish event: {0}")]
    Publish(#[from] QueueError),
}
