use crate::{
    error::DispatchError, filter::TableFilter, heartbeat::Heartbeat,
    offset_context::OffsetContext, topic::TopicNamingStrategy,
};
use chrono::Utc;
use engine_core::{context::TaskContext, schema::DatabaseSchema};
use model::{
    core::identifiers::Partition,
    events::{ChangeEvent, DataChange, Operation, RawChange, Row},
    records::record::{Envelope, SourceInfo, SourceRecord, TransactionBlock},
};
use serde_json::{Map, Value, json};
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace};

/// Identifies the connector in the `source` block of every envelope.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub connector: String,
    pub version: String,
    pub server_name: String,
}

/// Turns raw changes into change events bound to their offsets.
pub struct EventDispatcher {
    partition: Partition,
    schema: Arc<dyn DatabaseSchema>,
    filter: TableFilter,
    topics: Arc<dyn TopicNamingStrategy>,
    source: SourceDescriptor,
    heartbeat: Option<Heartbeat>,
}

impl EventDispatcher {
    pub fn new(
        ctx: &TaskContext,
        filter: TableFilter,
        topics: Arc<dyn TopicNamingStrategy>,
        source: SourceDescriptor,
    ) -> Self {
        Self {
            partition: ctx.partition.clone(),
            schema: ctx.schema.clone(),
            filter,
            topics,
            source,
            heartbeat: None,
        }
    }

    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval.map(Heartbeat::new);
        self
    }

    /// Advances `offsets` past `change` and returns the event to publish, if any.
    ///
    /// Changes of filtered tables and transaction boundaries only move the
    /// offset; schema changes are recorded in the schema history.
    pub async fn dispatch(
        &mut self,
        offsets: &mut OffsetContext,
        change: RawChange,
    ) -> Result<Option<ChangeEvent>, DispatchError> {
        match change {
            RawChange::Data(change) => {
                if !self.filter.is_included(&change.table) {
                    trace!(table = %change.table, "Skipping change of filtered table");
                    offsets.advance(change.position);
                    self.mark_pending();
                    return Ok(None);
                }

                offsets.advance_event(change.position, change.transaction_id.as_deref());
                let record = self.data_record(offsets, change).await;
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.mark_emitted();
                }
                Ok(Some(ChangeEvent::new(record)))
            }
            RawChange::Schema(change) => {
                if self.filter.is_included(&change.table) {
                    self.schema
                        .apply(&change)
                        .await
                        .map_err(|source| DispatchError::Schema {
                            table: change.table.to_string(),
                            source,
                        })?;
                    debug!(table = %change.table, position = %change.position, "Schema changed");
                }
                offsets.advance(change.position);
                self.mark_pending();
                Ok(None)
            }
            RawChange::TransactionCommit { position, .. } => {
                offsets.commit_transaction(position);
                self.mark_pending();
                Ok(None)
            }
        }
    }

    /// A value-less record carrying the current offset, when one is due.
    pub fn heartbeat(&mut self, offsets: &OffsetContext) -> Option<ChangeEvent> {
        let heartbeat = self.heartbeat.as_mut()?;
        if !heartbeat.is_due() {
            return None;
        }
        heartbeat.mark_emitted();

        Some(ChangeEvent::new(SourceRecord {
            source_partition: self.partition.clone(),
            source_offset: offsets.snapshot(),
            topic: self.topics.heartbeat_topic(),
            key: Some(json!({ "serverName": self.source.server_name })),
            value: None,
            notification: None,
            ts: Utc::now(),
        }))
    }

    fn mark_pending(&mut self) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.mark_pending();
        }
    }

    async fn data_record(&self, offsets: &OffsetContext, change: DataChange) -> SourceRecord {
        let key = self.key(&change).await;
        let transaction = change
            .transaction_id
            .as_ref()
            .map(|id| TransactionBlock {
                id: id.clone(),
                total_order: offsets.event_serial(),
            });

        let source = SourceInfo {
            version: self.source.version.clone(),
            connector: self.source.connector.clone(),
            name: self.source.server_name.clone(),
            ts_ms: change.ts.timestamp_millis(),
            snapshot: change.op == Operation::Read,
            db: change.table.database.clone(),
            schema: change.table.schema.clone(),
            table: change.table.table.clone(),
            commit_lsn: change.position.commit_lsn.to_string(),
            change_lsn: change.position.change_lsn.to_string(),
        };

        SourceRecord {
            source_partition: self.partition.clone(),
            source_offset: offsets.snapshot(),
            topic: self.topics.data_topic(&change.table),
            key,
            value: Some(Envelope {
                before: change.before,
                after: change.after,
                source,
                op: change.op,
                ts_ms: Utc::now().timestamp_millis(),
                transaction,
            }),
            notification: None,
            ts: change.ts,
        }
    }

    /// Primary key columns of the changed row, `None` for keyless tables.
    async fn key(&self, change: &DataChange) -> Option<Value> {
        let table = self.schema.table(&change.table).await?;
        let row: &Row = match change.op {
            Operation::Delete => change.before.as_ref()?,
            _ => change.after.as_ref().or(change.before.as_ref())?,
        };

        let key: Map<String, Value> = table
            .key_columns()
            .into_iter()
            .filter_map(|column| row.get(column).map(|v| (column.to_string(), v.clone())))
            .collect();
        (!key.is_empty()).then_some(Value::Object(key))
    }
}
