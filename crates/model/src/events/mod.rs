use crate::{
    core::{identifiers::TableId, offset::Offset, position::Position},
    records::record::SourceRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column values of a captured row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Kind of mutation a data change represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Row emitted by a snapshot rather than the change stream.
    #[serde(rename = "r")]
    Read,
}

impl Operation {
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Read => "r",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub primary_key: bool,
}

/// A single row mutation as read from the source log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataChange {
    pub position: Position,
    pub transaction_id: Option<String>,
    pub table: TableId,
    pub op: Operation,
    pub before: Option<Row>,
    pub after: Option<Row>,
    pub ts: DateTime<Utc>,
}

/// New structure of a captured table, effective from `position` onwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub position: Position,
    pub table: TableId,
    pub columns: Vec<ColumnDef>,
    pub ddl: Option<String>,
}

impl SchemaChange {
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Raw output of a source reader, prior to event construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RawChange {
    Data(DataChange),
    Schema(SchemaChange),
    TransactionCommit {
        position: Position,
        transaction_id: String,
    },
}

impl RawChange {
    pub fn position(&self) -> Position {
        match self {
            RawChange::Data(c) => c.position,
            RawChange::Schema(c) => c.position,
            RawChange::TransactionCommit { position, .. } => *position,
        }
    }
}

/// One captured mutation bound to the offset valid immediately after it.
///
/// The record and its offset are built together and never separated, so a
/// consumer can always resume exactly after the event it last handled.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    record: SourceRecord,
}

impl ChangeEvent {
    pub fn new(record: SourceRecord) -> Self {
        Self { record }
    }

    pub fn offset(&self) -> &Offset {
        &self.record.source_offset
    }

    pub fn record(&self) -> &SourceRecord {
        &self.record
    }

    pub fn into_record(self) -> SourceRecord {
        self.record
    }

    pub fn is_heartbeat(&self) -> bool {
        self.record.value.is_none() && self.record.notification.is_none()
    }

    pub fn is_notification(&self) -> bool {
        self.record.is_notification()
    }
}
