use crate::error::{OffsetError, StateStoreError};
use async_trait::async_trait;
use model::core::{identifiers::Partition, offset::Offset};
use tracing::info;

pub mod memory;
pub mod sled_store;

pub use memory::MemoryOffsetStore;
pub use sled_store::SledOffsetStore;

/// Durable storage for committed offsets, keyed by partition.
#[async_trait]
pub trait OffsetBackingStore: Send + Sync {
    async fn load(&self, partition: &Partition) -> Result<Option<Offset>, StateStoreError>;

    /// Persists `offset` unless a later one is already stored.
    async fn commit(&self, partition: &Partition, offset: &Offset) -> Result<(), StateStoreError>;

    async fn flush(&self) -> Result<(), StateStoreError>;
}

/// Supplies the partitions a task streams.
pub trait PartitionProvider: Send + Sync {
    fn partitions(&self) -> Vec<Partition>;
}

/// Provider for tasks that stream a single, fixed partition.
pub struct SinglePartitionProvider(pub Partition);

impl PartitionProvider for SinglePartitionProvider {
    fn partitions(&self) -> Vec<Partition> {
        vec![self.0.clone()]
    }
}

/// Previous offsets of every partition, `None` for partitions never committed.
#[derive(Debug, Clone)]
pub struct Offsets {
    entries: Vec<(Partition, Option<Offset>)>,
}

impl Offsets {
    pub fn new(entries: Vec<(Partition, Option<Offset>)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn the_only_partition(&self) -> Result<&Partition, OffsetError> {
        self.single().map(|(partition, _)| partition)
    }

    pub fn the_only_offset(&self) -> Result<Option<&Offset>, OffsetError> {
        self.single().map(|(_, offset)| offset.as_ref())
    }

    pub fn into_single(self) -> Result<(Partition, Option<Offset>), OffsetError> {
        self.single()?;
        self.entries
            .into_iter()
            .next()
            .ok_or(OffsetError::NoPartition)
    }

    fn single(&self) -> Result<&(Partition, Option<Offset>), OffsetError> {
        match self.entries.as_slice() {
            [entry] => Ok(entry),
            [] => Err(OffsetError::NoPartition),
            many => Err(OffsetError::MultiplePartitions(many.len())),
        }
    }
}

/// Loads the previous offset of each partition the provider names.
pub async fn resolve<P, S>(provider: &P, store: &S) -> Result<Offsets, OffsetError>
where
    P: PartitionProvider + ?Sized,
    S: OffsetBackingStore + ?Sized,
{
    let mut entries = Vec::new();
    for partition in provider.partitions() {
        let offset = store.load(&partition).await?;
        match &offset {
            Some(offset) => info!(
                partition = %partition,
                position = %offset.position,
                "Found previous offset"
            ),
            None => info!(partition = %partition, "No previous offset found"),
        }
        entries.push((partition, offset));
    }
    Ok(Offsets::new(entries))
}
