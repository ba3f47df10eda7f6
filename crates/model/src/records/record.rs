use crate::{
    core::{identifiers::Partition, offset::Offset},
    events::{Operation, Row},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata describing where a change came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub version: String,
    pub connector: String,
    pub name: String,
    pub ts_ms: i64,
    pub snapshot: bool,
    pub db: String,
    pub schema: String,
    pub table: String,
    pub commit_lsn: String,
    pub change_lsn: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBlock {
    pub id: String,
    pub total_order: u64,
}

/// Value of a data change record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub before: Option<Row>,
    pub after: Option<Row>,
    pub source: SourceInfo,
    pub op: Operation,
    pub ts_ms: i64,
    pub transaction: Option<TransactionBlock>,
}

/// Message about the task itself, such as the outcome of a signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub aggregate_type: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub additional_data: BTreeMap<String, String>,
}

/// Record handed to the host poller.
///
/// `value` is `None` for heartbeat and notification records. Heartbeats exist
/// only to carry an advanced offset; notifications carry `notification`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_partition: Partition,
    pub source_offset: Offset,
    pub topic: String,
    pub key: Option<serde_json::Value>,
    pub value: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    pub ts: DateTime<Utc>,
}

impl SourceRecord {
    pub fn is_notification(&self) -> bool {
        self.notification.is_some()
    }

    /// Rough in-memory footprint, used for byte-bounded buffering.
    pub fn size_bytes(&self) -> usize {
        let key = self.key.as_ref().map(json_size).unwrap_or(0);
        let value = self
            .value
            .as_ref()
            .map(|v| row_size(&v.before) + row_size(&v.after) + 256)
            .unwrap_or(0);
        let notification = self
            .notification
            .as_ref()
            .map(|n| {
                n.id.len()
                    + n.kind.len()
                    + n.additional_data
                        .iter()
                        .map(|(k, v)| k.len() + v.len())
                        .sum::<usize>()
            })
            .unwrap_or(0);
        self.topic.len() + key + value + notification + 64
    }
}

fn row_size(row: &Option<Row>) -> usize {
    row.as_ref()
        .map(|r| r.iter().map(|(k, v)| k.len() + json_size(v)).sum())
        .unwrap_or(0)
}

fn json_size(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(_) => 1,
        serde_json::Value::Number(_) => 8,
        serde_json::Value::String(s) => s.len(),
        serde_json::Value::Array(items) => items.iter().map(json_size).sum(),
        serde_json::Value::Object(map) => map.iter().map(|(k, v)| k.len() + json_size(v)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::Position;
    use serde_json::json;

    fn record(value: Option<Envelope>) -> SourceRecord {
        SourceRecord {
            source_partition: Partition::new("srv", "db"),
            source_offset: Offset::new(Position::new(1, 1)),
            topic: "srv.dbo.t".into(),
            key: Some(json!({"id": 1})),
            value,
            notification: None,
            ts: Utc::now(),
        }
    }

    #[test]
    fn size_grows_with_payload() {
        let heartbeat = record(None);
        let mut after = Row::new();
        after.insert("name".into(), json!("a".repeat(1000)));

        let data = record(Some(Envelope {
            before: None,
            after: Some(after),
            source: SourceInfo {
                version: "0.1.0".into(),
                connector: "journal".into(),
                name: "srv".into(),
                ts_ms: 0,
                snapshot: false,
                db: "db".into(),
                schema: "dbo".into(),
                table: "t".into(),
                commit_lsn: String::new(),
                change_lsn: String::new(),
            },
            op: Operation::Create,
            ts_ms: 0,
            transaction: None,
        }));

        assert!(data.size_bytes() > heartbeat.size_bytes() + 1000);
    }
}
