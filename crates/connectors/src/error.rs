use engine_core::error::ConnectionError;
use engine_processing::error::ReaderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal file is missing or unreadable.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A journal line is not a valid entry.
    #[error("Malformed journal entry at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    /// The stored offset lies past the end of the journal.
    #[error("Journal truncated: offset at line {requested} but journal has {available} lines")]
    Truncated { requested: u64, available: u64 },

    /// More transactions are waiting for their commit than the reader buffers.
    #[error("Too many open transactions at line {line}: limit is {limit}")]
    TooManyOpenTransactions { line: u64, limit: usize },

    #[error("Failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl From<JournalError> for ReaderError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::Connection(ConnectionError::Closed) => ReaderError::fatal(err),
            JournalError::Io(_) | JournalError::Connection(_) => ReaderError::transient(err),
            _ => ReaderError::fatal(err),
        }
    }
}
