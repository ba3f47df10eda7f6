use connectors::journal::{JournalConnector, JournalEntry, JournalWriter};
use engine_config::TaskConfig;
use engine_runtime::{error::TaskError, task::CdcTask};
use model::{
    events::{ColumnDef, Row},
    records::record::SourceRecord,
};
use serde_json::json;
use std::{path::PathBuf, time::Duration};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

pub const CUSTOMERS: &str = "dbo.customers";
pub const ORDERS: &str = "dbo.orders";

/// Upper bound for anything a scenario waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A journal plus state directory living in a temp dir.
pub struct Fixture {
    pub dir: TempDir,
    pub journal: PathBuf,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let journal = dir.path().join("inventory.jsonl");
        JournalWriter::open(&journal).await.expect("create journal");
        Self { dir, journal }
    }

    pub fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "inventory-task".into(),
            server_name: "server1".into(),
            database_name: "inventory".into(),
            poll_interval_ms: 50,
            max_batch_size: 100,
            max_queue_size: 1000,
            shutdown_timeout_ms: 1000,
            source: json!({
                "path": self.journal,
                "schema_history_path": self.dir.path().join("history"),
            }),
            ..TaskConfig::default()
        }
    }

    pub fn signal_path(&self) -> PathBuf {
        self.dir.path().join("signals.jsonl")
    }

    /// Appends one signal line to the signal file, creating it when missing.
    pub async fn send_signal(&self, signal: serde_json::Value) {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.signal_path())
            .await
            .expect("open signal file");
        file.write_all(format!("{signal}\n").as_bytes())
            .await
            .expect("append signal");
    }

    pub fn offsets_path(&self) -> PathBuf {
        self.dir.path().join("offsets")
    }

    pub async fn append(&self, entries: &[JournalEntry]) {
        let mut writer = JournalWriter::open(&self.journal).await.expect("open journal");
        writer.append_all(entries).await.expect("append to journal");
    }

    pub async fn append_raw(&self, line: &str) {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.journal)
            .await
            .expect("open journal");
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .expect("append to journal");
    }
}

pub fn customers_schema() -> JournalEntry {
    JournalEntry::schema(
        CUSTOMERS,
        vec![
            ColumnDef {
                name: "id".into(),
                type_name: "int".into(),
                optional: false,
                primary_key: true,
            },
            ColumnDef {
                name: "email".into(),
                type_name: "varchar".into(),
                optional: true,
                primary_key: false,
            },
        ],
    )
}

pub fn customer(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(id));
    row.insert("email".into(), json!(format!("customer{id}@example.com")));
    row
}

/// Inserts `ids` into customers, one transaction each.
pub fn insert_transactions(ids: impl IntoIterator<Item = i64>) -> Vec<JournalEntry> {
    ids.into_iter()
        .flat_map(|id| {
            let tx = format!("tx-{id}");
            [
                JournalEntry::insert(CUSTOMERS, Some(&tx), customer(id)),
                JournalEntry::commit(&tx),
            ]
        })
        .collect()
}

/// Polls and commits until `expected` data records arrived.
pub async fn consume(task: &CdcTask<JournalConnector>, expected: usize) -> Vec<SourceRecord> {
    let mut received = Vec::new();
    tokio::time::timeout(WAIT, async {
        while data_records(&received) < expected {
            let batch = task.poll().await.expect("poll");
            task.commit(&batch).await.expect("commit");
            received.extend(batch);
        }
    })
    .await
    .expect("records were not delivered in time");
    received
}

/// Polls and commits until a notification record arrives.
pub async fn consume_notification(task: &CdcTask<JournalConnector>) -> SourceRecord {
    tokio::time::timeout(WAIT, async {
        loop {
            let batch = task.poll().await.expect("poll");
            task.commit(&batch).await.expect("commit");
            if let Some(record) = batch.into_iter().find(SourceRecord::is_notification) {
                return record;
            }
        }
    })
    .await
    .expect("notification was not delivered in time")
}

/// Polls until the task reports a failure.
pub async fn poll_until_failed(task: &CdcTask<JournalConnector>) -> TaskError {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Err(e) = task.poll().await {
                return e;
            }
        }
    })
    .await
    .expect("task did not fail in time")
}

pub fn data_records(records: &[SourceRecord]) -> usize {
    records.iter().filter(|r| r.value.is_some()).count()
}

/// Ids of the rows carried by data records, in delivery order.
pub fn ids(records: &[SourceRecord]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.value.as_ref())
        .filter_map(|v| v.after.as_ref().or(v.before.as_ref()))
        .filter_map(|row| row.get("id").and_then(|id| id.as_i64()))
        .collect()
}
