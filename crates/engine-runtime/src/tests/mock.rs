use crate::{connector::SourceConnector, error::BoxError};
use async_trait::async_trait;
use chrono::Utc;
use engine_config::TaskConfig;
use engine_core::{
    connection::{ConnectionFactory, ConnectionHandle, ConnectionState, SourceConnection},
    error::{ConnectionError, SchemaError},
    schema::{DatabaseSchema, TableSchema},
};
use engine_processing::{
    error::{ReaderError, SignalError},
    reader::ChangeReader,
    signal::{Signal, SignalChannel},
};
use model::{
    core::{
        identifiers::{Partition, TableId},
        offset::Offset,
        position::Position,
    },
    events::{DataChange, Operation, RawChange, Row, SchemaChange},
};
use serde_json::json;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

/// Ordered journal of calls made on the mock collaborators.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    pub fn index_of(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Insert into `dbo.customers` in its own transaction, followed by the commit.
pub fn transaction(commit: u64) -> Vec<RawChange> {
    let mut row = Row::new();
    row.insert("id".into(), json!(commit));
    let tx = format!("tx-{commit}");
    vec![
        RawChange::Data(DataChange {
            position: Position::new(commit, 1),
            transaction_id: Some(tx.clone()),
            table: TableId::new("inventory", "dbo", "customers"),
            op: Operation::Create,
            before: None,
            after: Some(row),
            ts: Utc::now(),
        }),
        RawChange::TransactionCommit {
            position: Position::new(commit, 2),
            transaction_id: tx,
        },
    ]
}

pub struct MockConnection {
    role: &'static str,
    state: ConnectionState,
    log: CallLog,
    fail_rollback: bool,
}

#[async_trait]
impl SourceConnection for MockConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        self.log.push(format!("{}:auto_commit={enabled}", self.role));
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), ConnectionError> {
        self.log.push(format!("{}:begin", self.role));
        self.state = ConnectionState::InTransaction;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.log.push(format!("{}:rollback", self.role));
        if self.fail_rollback {
            return Err(ConnectionError::Transaction {
                operation: "rollback",
                reason: "connection reset".into(),
            });
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.log.push(format!("{}:close", self.role));
        self.state = ConnectionState::Disconnected;
        Ok(())
    }
}

struct MockFactory {
    log: CallLog,
    opened: Mutex<usize>,
    fail_rollback: bool,
}

#[async_trait]
impl ConnectionFactory<MockConnection> for MockFactory {
    async fn connect(&self) -> Result<MockConnection, ConnectionError> {
        let role = {
            let mut opened = self.opened.lock().unwrap();
            *opened += 1;
            if *opened == 1 { "main" } else { "metadata" }
        };
        self.log.push(format!("{role}:open"));
        Ok(MockConnection {
            role,
            state: ConnectionState::Connected,
            log: self.log.clone(),
            fail_rollback: self.fail_rollback,
        })
    }
}

pub struct MockSchema {
    log: CallLog,
    fail_init: bool,
}

#[async_trait]
impl DatabaseSchema for MockSchema {
    async fn initialize_storage(&self) -> Result<(), SchemaError> {
        self.log.push("schema:init");
        if self.fail_init {
            return Err(SchemaError::Storage("disk full".into()));
        }
        Ok(())
    }

    async fn recover(&self, partition: &Partition, offset: &Offset) -> Result<(), SchemaError> {
        self.log.push(format!(
            "schema:recover:{}:{}",
            partition.key(),
            offset.position.commit_lsn.0
        ));
        Ok(())
    }

    async fn apply(&self, change: &SchemaChange) -> Result<(), SchemaError> {
        self.log.push(format!("schema:apply:{}", change.table));
        Ok(())
    }

    async fn table(&self, _id: &TableId) -> Option<TableSchema> {
        None
    }

    async fn close(&self) -> Result<(), SchemaError> {
        self.log.push("schema:close");
        Ok(())
    }
}

/// Replays the whole journal from the beginning on every open, one
/// transaction per read, and keeps a transaction open on the main connection.
pub struct MockReader {
    main: ConnectionHandle<MockConnection>,
    journal: Vec<RawChange>,
    pending: VecDeque<Vec<RawChange>>,
    log: CallLog,
    fatal_after: Option<usize>,
    reads: usize,
}

#[async_trait]
impl ChangeReader for MockReader {
    async fn open(&mut self, resume_from: Option<&Offset>) -> Result<(), ReaderError> {
        let position = resume_from.map(|o| o.position.commit_lsn.0).unwrap_or(0);
        self.log.push(format!("reader:open:{position}"));
        self.main
            .lock()
            .await
            .begin()
            .await
            .map_err(ReaderError::transient)?;

        let mut transactions: Vec<Vec<RawChange>> = Vec::new();
        for change in &self.journal {
            let commit = change.position().commit_lsn;
            match transactions.last_mut() {
                Some(tx) if tx[0].position().commit_lsn == commit => tx.push(change.clone()),
                _ => transactions.push(vec![change.clone()]),
            }
        }
        self.pending = transactions.into();
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<RawChange>, ReaderError> {
        self.reads += 1;
        if self.fatal_after.is_some_and(|n| self.reads > n) {
            return Err(ReaderError::fatal("transaction log truncated"));
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), ReaderError> {
        self.log.push("reader:close");
        Ok(())
    }
}

/// Hands out its signals on the first read.
pub struct MockSignals {
    signals: Vec<Signal>,
    log: CallLog,
}

#[async_trait]
impl SignalChannel for MockSignals {
    fn name(&self) -> &str {
        "mock"
    }

    async fn read(&mut self) -> Result<Vec<Signal>, SignalError> {
        Ok(std::mem::take(&mut self.signals))
    }

    async fn close(&mut self) -> Result<(), SignalError> {
        self.log.push("signals:close");
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub log: CallLog,
    pub journal: Vec<RawChange>,
    pub fail_schema_init: bool,
    pub fail_rollback: bool,
    pub fatal_after: Option<usize>,
    pub driver: Arc<Mutex<BTreeMap<String, String>>>,
    pub signals: Vec<Signal>,
}

impl MockConnector {
    pub fn with_transactions(commits: impl IntoIterator<Item = u64>) -> Self {
        Self {
            journal: commits.into_iter().flat_map(transaction).collect(),
            ..Self::default()
        }
    }
}

impl SourceConnector for MockConnector {
    type Connection = MockConnection;
    type Reader = MockReader;

    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    fn connection_factory(
        &self,
        config: &TaskConfig,
    ) -> Result<Box<dyn ConnectionFactory<MockConnection>>, BoxError> {
        *self.driver.lock().unwrap() = config.driver.clone();
        Ok(Box::new(MockFactory {
            log: self.log.clone(),
            opened: Mutex::new(0),
            fail_rollback: self.fail_rollback,
        }))
    }

    fn schema(&self, _config: &TaskConfig) -> Result<Arc<dyn DatabaseSchema>, BoxError> {
        Ok(Arc::new(MockSchema {
            log: self.log.clone(),
            fail_init: self.fail_schema_init,
        }))
    }

    fn reader(
        &self,
        _config: &TaskConfig,
        main: ConnectionHandle<MockConnection>,
        _metadata: ConnectionHandle<MockConnection>,
    ) -> Result<MockReader, BoxError> {
        Ok(MockReader {
            main,
            journal: self.journal.clone(),
            pending: VecDeque::new(),
            log: self.log.clone(),
            fatal_after: self.fatal_after,
            reads: 0,
        })
    }

    fn signal_channels(&self, _config: &TaskConfig) -> Vec<Box<dyn SignalChannel>> {
        if self.signals.is_empty() {
            return Vec::new();
        }
        vec![Box::new(MockSignals {
            signals: self.signals.clone(),
            log: self.log.clone(),
        })]
    }
}

pub fn config() -> TaskConfig {
    TaskConfig {
        name: "inventory-task".into(),
        server_name: "server1".into(),
        database_name: "inventory".into(),
        poll_interval_ms: 100,
        max_batch_size: 2,
        max_queue_size: 10,
        shutdown_timeout_ms: 500,
        ..TaskConfig::default()
    }
}
