use crate::{
    error::SchemaError,
    schema::{DatabaseSchema, TableSchema},
};
use async_trait::async_trait;
use model::{
    core::{identifiers::Partition, identifiers::TableId, offset::Offset, position::Position},
    events::SchemaChange,
};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;
use tracing::{debug, info};

const HISTORY_TREE: &str = "schema_history";

/// Schema history persisted in sled.
///
/// Every applied change is stored under `<partition key>\0<position>` with the
/// position encoded big-endian, so a range scan replays changes in stream order.
pub struct SledSchemaHistory {
    location: Location,
    partition: Partition,
    tree: RwLock<Option<sled::Tree>>,
    tables: RwLock<HashMap<TableId, TableSchema>>,
    closed: AtomicBool,
}

enum Location {
    Path(PathBuf),
    Db(sled::Db),
}

impl SledSchemaHistory {
    pub fn new(path: impl Into<PathBuf>, partition: Partition) -> Self {
        Self::at(Location::Path(path.into()), partition)
    }

    /// Shares an already opened database.
    pub fn with_db(db: sled::Db, partition: Partition) -> Self {
        Self::at(Location::Db(db), partition)
    }

    fn at(location: Location, partition: Partition) -> Self {
        Self {
            location,
            partition,
            tree: RwLock::new(None),
            tables: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn prefix(partition: &Partition) -> Vec<u8> {
        let mut key = partition.key().into_bytes();
        key.push(0);
        key
    }

    fn key(partition: &Partition, position: &Position) -> Vec<u8> {
        let mut key = Self::prefix(partition);
        key.extend_from_slice(&position.commit_lsn.0.to_be_bytes());
        key.extend_from_slice(&position.change_lsn.0.to_be_bytes());
        key
    }

    async fn tree(&self) -> Result<sled::Tree, SchemaError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchemaError::Closed);
        }
        self.tree
            .read()
            .await
            .clone()
            .ok_or_else(|| SchemaError::Storage("schema history storage is not initialized".into()))
    }

    /// Number of recorded changes for this partition.
    pub async fn len(&self) -> Result<usize, SchemaError> {
        let tree = self.tree().await?;
        Ok(tree.scan_prefix(Self::prefix(&self.partition)).count())
    }

    pub async fn is_empty(&self) -> Result<bool, SchemaError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl DatabaseSchema for SledSchemaHistory {
    async fn initialize_storage(&self) -> Result<(), SchemaError> {
        let mut slot = self.tree.write().await;
        if slot.is_some() {
            return Ok(());
        }
        let db = match &self.location {
            Location::Path(path) => sled::open(path)?,
            Location::Db(db) => db.clone(),
        };
        *slot = Some(db.open_tree(HISTORY_TREE)?);
        debug!(partition = %self.partition, "Initialized schema history storage");
        Ok(())
    }

    async fn recover(&self, partition: &Partition, offset: &Offset) -> Result<(), SchemaError> {
        let tree = self.tree().await?;
        let start = Self::prefix(partition);
        let end = Self::key(partition, &offset.position);

        let mut recovered = HashMap::new();
        for item in tree.range(start..=end) {
            let (_, value) = item?;
            let change: SchemaChange =
                bincode::deserialize(&value).map_err(|e| SchemaError::Recovery {
                    position: offset.position.to_string(),
                    reason: e.to_string(),
                })?;
            recovered.insert(change.table.clone(), TableSchema::from_change(&change));
        }

        info!(
            partition = %partition,
            position = %offset.position,
            tables = recovered.len(),
            "Recovered schema history"
        );
        *self.tables.write().await = recovered;
        Ok(())
    }

    async fn apply(&self, change: &SchemaChange) -> Result<(), SchemaError> {
        let tree = self.tree().await?;
        let key = Self::key(&self.partition, &change.position);
        tree.insert(key, bincode::serialize(change)?)?;

        debug!(table = %change.table, position = %change.position, "Applied schema change");
        self.tables
            .write()
            .await
            .insert(change.table.clone(), TableSchema::from_change(change));
        Ok(())
    }

    async fn table(&self, id: &TableId) -> Option<TableSchema> {
        self.tables.read().await.get(id).cloned()
    }

    async fn close(&self) -> Result<(), SchemaError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(tree) = self.tree.write().await.take() {
            tree.flush_async().await?;
        }
        debug!("Closed schema history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::events::ColumnDef;
    use tempfile::tempdir;

    fn partition() -> Partition {
        Partition::new("server1", "inventory")
    }

    fn change(position: Position, columns: &[&str]) -> SchemaChange {
        SchemaChange {
            position,
            table: TableId::new("inventory", "dbo", "customers"),
            columns: columns
                .iter()
                .map(|name| ColumnDef {
                    name: name.to_string(),
                    type_name: "varchar".into(),
                    optional: true,
                    primary_key: *name == "id",
                })
                .collect(),
            ddl: None,
        }
    }

    #[tokio::test]
    async fn requires_initialization() {
        let dir = tempdir().unwrap();
        let history = SledSchemaHistory::new(dir.path(), partition());

        let result = history.apply(&change(Position::new(1, 1), &["id"])).await;
        assert!(matches!(result, Err(SchemaError::Storage(_))));
    }

    #[tokio::test]
    async fn recovers_structure_as_of_offset() {
        let dir = tempdir().unwrap();
        let id = TableId::new("inventory", "dbo", "customers");
        {
            let history = SledSchemaHistory::new(dir.path(), partition());
            history.initialize_storage().await.unwrap();
            history.apply(&change(Position::new(1, 1), &["id"])).await.unwrap();
            history
                .apply(&change(Position::new(5, 5), &["id", "email"]))
                .await
                .unwrap();
            history.close().await.unwrap();
        }

        let history = SledSchemaHistory::new(dir.path(), partition());
        history.initialize_storage().await.unwrap();
        assert!(history.table(&id).await.is_none());

        history
            .recover(&partition(), &Offset::new(Position::new(3, 0)))
            .await
            .unwrap();
        let table = history.table(&id).await.unwrap();
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.key_columns(), vec!["id"]);

        history
            .recover(&partition(), &Offset::new(Position::new(5, 5)))
            .await
            .unwrap();
        assert_eq!(history.table(&id).await.unwrap().columns.len(), 2);
        assert_eq!(history.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn closed_history_rejects_changes() {
        let dir = tempdir().unwrap();
        let history = SledSchemaHistory::new(dir.path(), partition());
        history.initialize_storage().await.unwrap();

        history.close().await.unwrap();
        history.close().await.unwrap();

        let result = history.apply(&change(Position::new(1, 1), &["id"])).await;
        assert!(matches!(result, Err(SchemaError::Closed)));
    }
}
