use crate::error::ReaderError;
use async_trait::async_trait;
use model::{core::offset::Offset, events::RawChange};

/// Source of raw changes, implemented once per database.
#[async_trait]
pub trait ChangeReader: Send + 'static {
    /// Positions the reader right after `resume_from`, or at the configured
    /// starting point on a first run.
    async fn open(&mut self, resume_from: Option<&Offset>) -> Result<(), ReaderError>;

    /// Next batch of changes, aligned to transaction boundaries. An empty
    /// batch means the source is idle.
    async fn read(&mut self) -> Result<Vec<RawChange>, ReaderError>;

    async fn close(&mut self) -> Result<(), ReaderError> {
        Ok(())
    }
}
