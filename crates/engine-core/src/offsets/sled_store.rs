use crate::{error::StateStoreError, offsets::OffsetBackingStore};
use async_trait::async_trait;
use model::core::{identifiers::Partition, offset::Offset};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::{debug, trace};

const OFFSETS_TREE: &str = "offsets";

pub struct SledOffsetStore {
    db: sled::Db,
    offsets: sled::Tree,
}

impl SledOffsetStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// Uses a tree of an already opened database.
    pub fn with_db(db: sled::Db) -> Result<Self, StateStoreError> {
        let offsets = db.open_tree(OFFSETS_TREE)?;
        Ok(Self { db, offsets })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Every stored offset, keyed by partition key.
    pub fn entries(&self) -> Result<Vec<(String, Offset)>, StateStoreError> {
        let mut entries = Vec::new();
        for item in self.offsets.iter() {
            let (key, value) = item?;
            let offset: Offset = bincode::deserialize(&value)?;
            entries.push((String::from_utf8_lossy(&key).into_owned(), offset));
        }
        Ok(entries)
    }
}

#[async_trait]
impl OffsetBackingStore for SledOffsetStore {
    async fn load(&self, partition: &Partition) -> Result<Option<Offset>, StateStoreError> {
        match self.offsets.get(partition.key())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, partition: &Partition, offset: &Offset) -> Result<(), StateStoreError> {
        let key = partition.key();
        let new_bytes = bincode::serialize(offset)?;

        // Check-then-set in one transaction so a late commit cannot rewind the stream.
        let result = self.offsets.transaction(|tx| {
            if let Some(existing) = tx.get(key.as_bytes())? {
                let existing: Offset = bincode::deserialize(&existing)
                    .map_err(|e| ConflictableTransactionError::Abort(StateStoreError::from(e)))?;
                if offset.position < existing.position {
                    trace!(
                        stored = %existing.position,
                        rejected = %offset.position,
                        "Ignoring offset older than the stored one"
                    );
                    return Ok(());
                }
            }
            tx.insert(key.as_bytes(), new_bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {
                debug!(partition = %partition, position = %offset.position, "Committed offset");
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StateStoreError::SaveOffset(e.to_string())),
        }
    }

    async fn flush(&self) -> Result<(), StateStoreError> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StateStoreError::Flush(e.to_string()))?;
        Ok(())
    }
}
