use crate::error::ConvertError;
use model::records::record::SourceRecord;
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";
const EXTENSION_PREFIX: &str = "iodata";

/// Serializes records for the host.
pub trait RecordConverter: Send + Sync {
    fn convert(&self, record: &SourceRecord) -> Result<Value, ConvertError>;
}

/// The record as is: topic, partition, offset, key and value.
#[derive(Debug, Default, Clone)]
pub struct JsonConverter;

impl RecordConverter for JsonConverter {
    fn convert(&self, record: &SourceRecord) -> Result<Value, ConvertError> {
        Ok(serde_json::to_value(record)?)
    }
}

/// Renders records as CloudEvents 1.0 structured JSON.
///
/// Source metadata travels as `iodata*` extension attributes, the envelope
/// as `data`. Heartbeats become events with null data; notifications carry
/// the notification itself.
#[derive(Debug, Clone)]
pub struct CloudEventsConverter {
    connector: String,
}

impl CloudEventsConverter {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
        }
    }
}

impl RecordConverter for CloudEventsConverter {
    fn convert(&self, record: &SourceRecord) -> Result<Value, ConvertError> {
        let server = &record.source_partition.server_name;
        let mut event = Map::new();

        let (id, kind) = match (&record.value, &record.notification) {
            (Some(envelope), _) => (
                format!(
                    "name:{};commit_lsn:{};change_lsn:{}",
                    envelope.source.name, envelope.source.commit_lsn, envelope.source.change_lsn
                ),
                "datachangeevent",
            ),
            (None, Some(notification)) => (notification.id.clone(), "notification"),
            (None, None) => (Uuid::new_v4().to_string(), "heartbeat"),
        };

        event.insert("id".into(), json!(id));
        event.insert(
            "source".into(),
            json!(format!("/tributary/{}/{}", self.connector, server)),
        );
        event.insert("specversion".into(), json!(CLOUDEVENTS_SPEC_VERSION));
        event.insert(
            "type".into(),
            json!(format!("io.tributary.{}.{}", self.connector, kind)),
        );
        event.insert("time".into(), json!(record.ts.to_rfc3339()));
        event.insert("datacontenttype".into(), json!("application/json"));
        event.insert("subject".into(), json!(record.topic));

        if let Some(envelope) = &record.value {
            let source = &envelope.source;
            let extensions = [
                ("op", json!(envelope.op.code())),
                ("version", json!(source.version)),
                ("connector", json!(source.connector)),
                ("name", json!(source.name)),
                ("tsms", json!(source.ts_ms)),
                ("snapshot", json!(source.snapshot)),
                ("db", json!(source.db)),
                ("schema", json!(source.schema)),
                ("table", json!(source.table)),
                ("commitlsn", json!(source.commit_lsn)),
                ("changelsn", json!(source.change_lsn)),
            ];
            for (name, value) in extensions {
                event.insert(format!("{EXTENSION_PREFIX}{name}"), value);
            }
            if let Some(tx) = &envelope.transaction {
                event.insert(format!("{EXTENSION_PREFIX}txid"), json!(tx.id));
                event.insert(
                    format!("{EXTENSION_PREFIX}txtotalorder"),
                    json!(tx.total_order),
                );
            }
        }

        let data = match (&record.value, &record.notification) {
            (Some(envelope), _) => serde_json::to_value(envelope)?,
            (None, Some(notification)) => serde_json::to_value(notification)?,
            (None, None) => Value::Null,
        };
        event.insert("data".into(), data);

        Ok(Value::Object(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::{
        core::{identifiers::Partition, offset::Offset, position::Position},
        events::{Operation, Row},
        records::record::{Envelope, Notification, SourceInfo, TransactionBlock},
    };
    use std::collections::BTreeMap;

    fn record(value: bool) -> SourceRecord {
        let mut after = Row::new();
        after.insert("id".into(), json!(7));

        SourceRecord {
            source_partition: Partition::new("server1", "inventory"),
            source_offset: Offset::new(Position::new(10, 11)),
            topic: "server1.dbo.customers".into(),
            key: Some(json!({ "id": 7 })),
            value: value.then(|| Envelope {
                before: None,
                after: Some(after),
                source: SourceInfo {
                    version: "0.1.0".into(),
                    connector: "journal".into(),
                    name: "server1".into(),
                    ts_ms: 1_700_000_000_000,
                    snapshot: false,
                    db: "inventory".into(),
                    schema: "dbo".into(),
                    table: "customers".into(),
                    commit_lsn: "000000000000000a".into(),
                    change_lsn: "000000000000000b".into(),
                },
                op: Operation::Create,
                ts_ms: 1_700_000_000_100,
                transaction: Some(TransactionBlock {
                    id: "tx-10".into(),
                    total_order: 1,
                }),
            }),
            notification: None,
            ts: Utc::now(),
        }
    }

    #[test]
    fn renders_cloud_event_attributes() {
        let event = CloudEventsConverter::new("journal")
            .convert(&record(true))
            .unwrap();

        assert_eq!(event["specversion"], "1.0");
        assert_eq!(
            event["id"],
            "name:server1;commit_lsn:000000000000000a;change_lsn:000000000000000b"
        );
        assert_eq!(event["source"], "/tributary/journal/server1");
        assert_eq!(event["type"], "io.tributary.journal.datachangeevent");
        assert_eq!(event["datacontenttype"], "application/json");
        assert_eq!(event["iodataop"], "c");
        assert_eq!(event["iodatatable"], "customers");
        assert_eq!(event["iodatatxid"], "tx-10");
        assert_eq!(event["data"]["after"]["id"], 7);
    }

    #[test]
    fn heartbeat_has_null_data() {
        let event = CloudEventsConverter::new("journal")
            .convert(&record(false))
            .unwrap();

        assert_eq!(event["type"], "io.tributary.journal.heartbeat");
        assert!(event["data"].is_null());
        assert!(event.get("iodataop").is_none());
        assert!(Uuid::parse_str(event["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn notification_keeps_its_id_and_payload() {
        let mut record = record(false);
        record.topic = "__notifications.server1".into();
        record.notification = Some(Notification {
            id: "sig-1".into(),
            aggregate_type: "Signal".into(),
            kind: "log".into(),
            additional_data: BTreeMap::from([("status".to_string(), "COMPLETED".to_string())]),
        });

        let event = CloudEventsConverter::new("journal").convert(&record).unwrap();

        assert_eq!(event["id"], "sig-1");
        assert_eq!(event["type"], "io.tributary.journal.notification");
        assert_eq!(event["data"]["type"], "log");
        assert_eq!(event["data"]["additional_data"]["status"], "COMPLETED");
    }

    #[test]
    fn plain_json_keeps_offset() {
        let value = JsonConverter.convert(&record(true)).unwrap();
        assert_eq!(value["topic"], "server1.dbo.customers");
        assert_eq!(value["source_offset"]["position"]["commit_lsn"], 10);
    }
}
