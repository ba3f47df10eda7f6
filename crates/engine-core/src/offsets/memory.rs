use crate::{error::StateStoreError, offsets::OffsetBackingStore};
use async_trait::async_trait;
use model::core::{identifiers::Partition, offset::Offset};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process offset store for dry runs and tests. Same monotonic rule as the
/// durable store.
#[derive(Default)]
pub struct MemoryOffsetStore {
    offsets: RwLock<HashMap<String, Offset>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetBackingStore for MemoryOffsetStore {
    async fn load(&self, partition: &Partition) -> Result<Option<Offset>, StateStoreError> {
        Ok(self.offsets.read().await.get(&partition.key()).cloned())
    }

    async fn commit(&self, partition: &Partition, offset: &Offset) -> Result<(), StateStoreError> {
        let mut offsets = self.offsets.write().await;
        let stale = offsets
            .get(&partition.key())
            .is_some_and(|current| offset.position < current.position);
        if !stale {
            offsets.insert(partition.key(), offset.clone());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}
