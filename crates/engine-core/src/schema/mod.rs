use crate::error::SchemaError;
use async_trait::async_trait;
use model::{
    core::{identifiers::Partition, identifiers::TableId, offset::Offset, position::Position},
    events::{ColumnDef, SchemaChange},
};
use serde::{Deserialize, Serialize};

pub mod history;

pub use history::SledSchemaHistory;

/// Structure of a captured table as known at some position in the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: TableId,
    pub columns: Vec<ColumnDef>,
    /// Position from which this structure applies.
    pub since: Position,
}

impl TableSchema {
    pub fn from_change(change: &SchemaChange) -> Self {
        Self {
            id: change.table.clone(),
            columns: change.columns.clone(),
            since: change.position,
        }
    }

    pub fn key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Catalog of captured table structures, backed by a durable history.
#[async_trait]
pub trait DatabaseSchema: Send + Sync {
    /// Prepares the history storage; called once before anything else.
    async fn initialize_storage(&self) -> Result<(), SchemaError>;

    /// Rebuilds the in-memory catalog as it was at `offset`.
    async fn recover(&self, partition: &Partition, offset: &Offset) -> Result<(), SchemaError>;

    /// Records a structure change and makes it current.
    async fn apply(&self, change: &SchemaChange) -> Result<(), SchemaError>;

    async fn table(&self, id: &TableId) -> Option<TableSchema>;

    async fn close(&self) -> Result<(), SchemaError>;
}
