use crate::{
    error::JournalError,
    journal::{connection::JournalConnection, entry::JournalEntry},
};
use async_trait::async_trait;
use chrono::Utc;
use engine_core::connection::{ConnectionHandle, ConnectionState, SourceConnection};
use engine_processing::{error::ReaderError, reader::ChangeReader};
use model::{
    core::{identifiers::TableId, offset::Offset, position::Position},
    events::{DataChange, Operation, RawChange, SchemaChange},
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_OPEN_TRANSACTIONS: usize = 10_000;

/// Streams committed changes out of a journal.
///
/// Data lines of a transaction are held back until its `commit` line, then
/// emitted together with commit LSN = the commit line. A `rollback` line drops
/// them. Lines outside a transaction commit on their own line.
pub struct JournalReader {
    main: ConnectionHandle<JournalConnection>,
    metadata: ConnectionHandle<JournalConnection>,
    database: String,
    lines_per_read: usize,
    /// Commit LSNs below this were delivered before the restart.
    resume_commit: u64,
    open_transactions: HashMap<String, Vec<(u64, JournalEntry)>>,
    max_open_transactions: usize,
}

impl JournalReader {
    pub fn new(
        main: ConnectionHandle<JournalConnection>,
        metadata: ConnectionHandle<JournalConnection>,
        database: impl Into<String>,
        lines_per_read: usize,
    ) -> Self {
        Self {
            main,
            metadata,
            database: database.into(),
            lines_per_read: lines_per_read.max(1),
            resume_commit: 0,
            open_transactions: HashMap::new(),
            max_open_transactions: DEFAULT_MAX_OPEN_TRANSACTIONS,
        }
    }

    /// Caps how many uncommitted transactions are buffered at once.
    pub fn with_max_open_transactions(mut self, limit: usize) -> Self {
        self.max_open_transactions = limit.max(1);
        self
    }

    pub fn open_transactions(&self) -> usize {
        self.open_transactions.len()
    }

    fn table(&self, line: u64, name: &str) -> Result<TableId, JournalError> {
        TableId::parse(&self.database, name).map_err(|e| JournalError::Malformed {
            line,
            reason: e.to_string(),
        })
    }

    fn parse(line: u64, raw: &str) -> Result<Option<JournalEntry>, JournalError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| JournalError::Malformed {
                line,
                reason: e.to_string(),
            })
    }

    fn data_change(
        &self,
        position: Position,
        entry: JournalEntry,
    ) -> Result<Option<RawChange>, JournalError> {
        let line = position.change_lsn.0;
        let (table, tx, op, before, after, ts) = match entry {
            JournalEntry::Insert {
                table, tx, after, ts,
            } => (table, tx, Operation::Create, None, Some(after), ts),
            JournalEntry::Update {
                table,
                tx,
                before,
                after,
                ts,
            } => (table, tx, Operation::Update, before, Some(after), ts),
            JournalEntry::Delete {
                table, tx, before, ts,
            } => (table, tx, Operation::Delete, Some(before), None, ts),
            JournalEntry::Schema {
                table,
                columns,
                ddl,
            } => {
                return Ok(Some(RawChange::Schema(SchemaChange {
                    position,
                    table: self.table(line, &table)?,
                    columns,
                    ddl,
                })));
            }
            JournalEntry::Commit { .. } | JournalEntry::Rollback { .. } => return Ok(None),
        };

        Ok(Some(RawChange::Data(DataChange {
            position,
            transaction_id: tx,
            table: self.table(line, &table)?,
            op,
            before,
            after,
            ts: ts.unwrap_or_else(Utc::now),
        })))
    }

    /// Turns one journal line into the changes it makes visible.
    fn apply(
        &mut self,
        line: u64,
        entry: JournalEntry,
        out: &mut Vec<RawChange>,
    ) -> Result<(), JournalError> {
        match entry {
            JournalEntry::Commit { tx } => {
                let changes = self.open_transactions.remove(&tx).unwrap_or_default();
                if line < self.resume_commit {
                    return Ok(());
                }
                for (change_line, change) in changes {
                    if let Some(change) = self.data_change(Position::new(line, change_line), change)? {
                        out.push(change);
                    }
                }
                out.push(RawChange::TransactionCommit {
                    position: Position::new(line, line),
                    transaction_id: tx,
                });
            }
            JournalEntry::Rollback { tx } => {
                if let Some(dropped) = self.open_transactions.remove(&tx) {
                    debug!(tx = %tx, line, dropped = dropped.len(), "Discarded rolled back transaction");
                }
            }
            entry => match entry.transaction_id() {
                Some(tx) => {
                    let tx = tx.to_string();
                    if !self.open_transactions.contains_key(&tx)
                        && self.open_transactions.len() >= self.max_open_transactions
                    {
                        return Err(JournalError::TooManyOpenTransactions {
                            line,
                            limit: self.max_open_transactions,
                        });
                    }
                    self.open_transactions
                        .entry(tx)
                        .or_default()
                        .push((line, entry));
                }
                None => {
                    if line < self.resume_commit {
                        return Ok(());
                    }
                    if let Some(change) = self.data_change(Position::new(line, line), entry)? {
                        out.push(change);
                    }
                }
            },
        }
        Ok(())
    }

    async fn scan(&mut self, conn: &mut JournalConnection) -> Result<Vec<RawChange>, JournalError> {
        let mut changes = Vec::new();
        loop {
            let lines = conn.next_lines(self.lines_per_read).await?;
            if lines.is_empty() {
                break;
            }
            for (line, raw) in lines {
                if let Some(entry) = Self::parse(line, &raw)? {
                    self.apply(line, entry, &mut changes)?;
                }
            }
            if !changes.is_empty() {
                break;
            }
        }
        Ok(changes)
    }

    /// Reads inside the session transaction. A failed read is rolled back so
    /// the same lines are read again by the next attempt.
    async fn read_changes(&mut self) -> Result<Vec<RawChange>, JournalError> {
        let main = self.main.clone();
        let mut conn = main.lock().await;
        if conn.state() != ConnectionState::InTransaction {
            conn.begin().await?;
        }

        let pending = self.open_transactions.clone();
        match self.scan(&mut conn).await {
            Ok(changes) => {
                conn.commit().await?;
                conn.begin().await?;
                Ok(changes)
            }
            Err(e) => {
                self.open_transactions = pending;
                if let Err(rollback) = conn.rollback().await {
                    warn!(error = %rollback, "Failed to roll back journal session after read error");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ChangeReader for JournalReader {
    async fn open(&mut self, resume_from: Option<&Offset>) -> Result<(), ReaderError> {
        self.open_transactions.clear();
        self.resume_commit = 0;

        if let Some(offset) = resume_from {
            let requested = offset.position.commit_lsn.0;
            let available = self.metadata.lock().await.line_count().await?;
            if requested > available {
                return Err(JournalError::Truncated {
                    requested,
                    available,
                }
                .into());
            }
            self.resume_commit = requested;
        }

        let mut main = self.main.lock().await;
        if main.line() > 0 || main.state() == ConnectionState::InTransaction {
            warn!(line = main.line(), "Reader reopened, rewinding session");
            main.rewind().await?;
        }
        main.begin().await.map_err(JournalError::from)?;

        info!(
            path = %main.path().display(),
            resume_commit = self.resume_commit,
            "Journal reader positioned"
        );
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<RawChange>, ReaderError> {
        let changes = self.read_changes().await?;
        if !changes.is_empty() {
            debug!(changes = changes.len(), "Read journal changes");
        }
        Ok(changes)
    }

    async fn close(&mut self) -> Result<(), ReaderError> {
        if !self.open_transactions.is_empty() {
            debug!(
                pending = self.open_transactions.len(),
                "Dropping uncommitted journal transactions"
            );
        }
        self.open_transactions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::events::{ColumnDef, Row};
    use serde_json::json;
    use std::{io::Write, sync::Arc};
    use tempfile::NamedTempFile;
    use tokio::sync::Mutex;

    fn row(id: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(id));
        row
    }

    fn write(file: &mut NamedTempFile, entries: &[JournalEntry]) {
        for entry in entries {
            writeln!(file, "{}", serde_json::to_string(entry).unwrap()).unwrap();
        }
        file.flush().unwrap();
    }

    async fn reader(file: &NamedTempFile) -> JournalReader {
        let main = JournalConnection::open(file.path()).await.unwrap();
        let metadata = JournalConnection::open(file.path()).await.unwrap();
        JournalReader::new(
            Arc::new(Mutex::new(main)),
            Arc::new(Mutex::new(metadata)),
            "inventory",
            16,
        )
    }

    fn positions(changes: &[RawChange]) -> Vec<(u64, u64)> {
        changes
            .iter()
            .map(|c| (c.position().commit_lsn.0, c.position().change_lsn.0))
            .collect()
    }

    #[tokio::test]
    async fn emits_transactions_at_commit() {
        let mut file = NamedTempFile::new().unwrap();
        write(
            &mut file,
            &[
                JournalEntry::insert("dbo.customers", Some("t1"), row(1)),
                JournalEntry::insert("dbo.orders", Some("t2"), row(10)),
                JournalEntry::insert("dbo.customers", Some("t1"), row(2)),
                JournalEntry::commit("t1"),
            ],
        );
        let mut reader = reader(&file).await;
        reader.open(None).await.unwrap();

        let changes = reader.read().await.unwrap();
        assert_eq!(positions(&changes), vec![(4, 1), (4, 3), (4, 4)]);
        assert!(matches!(
            &changes[2],
            RawChange::TransactionCommit { transaction_id, .. } if transaction_id == "t1"
        ));

        write(&mut file, &[JournalEntry::commit("t2")]);
        let changes = reader.read().await.unwrap();
        assert_eq!(positions(&changes), vec![(5, 2), (5, 5)]);
        assert!(reader.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn standalone_changes_commit_on_their_line() {
        let mut file = NamedTempFile::new().unwrap();
        write(
            &mut file,
            &[
                JournalEntry::schema(
                    "dbo.customers",
                    vec![ColumnDef {
                        name: "id".into(),
                        type_name: "int".into(),
                        optional: false,
                        primary_key: true,
                    }],
                ),
                JournalEntry::delete("dbo.customers", None, row(1)),
            ],
        );
        let mut reader = reader(&file).await;
        reader.open(None).await.unwrap();

        let changes = reader.read().await.unwrap();
        assert_eq!(positions(&changes), vec![(1, 1), (2, 2)]);
        assert!(matches!(&changes[0], RawChange::Schema(s) if s.table.qualified() == "dbo.customers"));
        assert!(matches!(
            &changes[1],
            RawChange::Data(d) if d.op == Operation::Delete && d.table.database == "inventory"
        ));
    }

    #[tokio::test]
    async fn resumes_from_commit_of_offset() {
        let mut file = NamedTempFile::new().unwrap();
        write(
            &mut file,
            &[
                JournalEntry::insert("dbo.customers", Some("t1"), row(1)),
                JournalEntry::commit("t1"),
                JournalEntry::insert("dbo.customers", Some("t2"), row(2)),
                JournalEntry::commit("t2"),
                JournalEntry::insert("dbo.customers", None, row(3)),
            ],
        );
        let mut reader = reader(&file).await;
        reader
            .open(Some(&Offset::new(Position::new(4, 3))))
            .await
            .unwrap();

        let changes = reader.read().await.unwrap();
        assert_eq!(positions(&changes), vec![(4, 3), (4, 4), (5, 5)]);
    }

    #[tokio::test]
    async fn rejects_offset_past_end_of_journal() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, &[JournalEntry::commit("t1")]);
        let mut reader = reader(&file).await;

        let err = reader
            .open(Some(&Offset::new(Position::new(9, 9))))
            .await
            .unwrap_err();
        assert!(matches!(err, ReaderError::Fatal(_)));
        assert!(err.to_string().contains("truncated"));
    }

    #[tokio::test]
    async fn malformed_line_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        file.flush().unwrap();
        let mut reader = reader(&file).await;
        reader.open(None).await.unwrap();

        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, ReaderError::Fatal(_)));
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn rollback_discards_buffered_changes() {
        let mut file = NamedTempFile::new().unwrap();
        let mut entries: Vec<JournalEntry> = (0..100)
            .map(|i| JournalEntry::insert("dbo.customers", Some(&format!("a{i}")), row(i)))
            .collect();
        entries.extend((0..100).map(|i| JournalEntry::rollback(&format!("a{i}"))));
        entries.push(JournalEntry::insert("dbo.customers", Some("t1"), row(1000)));
        entries.push(JournalEntry::commit("t1"));
        write(&mut file, &entries);
        let mut reader = reader(&file).await;
        reader.open(None).await.unwrap();

        let mut changes = Vec::new();
        loop {
            let batch = reader.read().await.unwrap();
            if batch.is_empty() {
                break;
            }
            changes.extend(batch);
        }

        assert_eq!(positions(&changes), vec![(202, 201), (202, 202)]);
        assert_eq!(reader.open_transactions(), 0);
    }

    #[tokio::test]
    async fn too_many_open_transactions_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        let entries: Vec<JournalEntry> = (0..4)
            .map(|i| JournalEntry::insert("dbo.customers", Some(&format!("a{i}")), row(i)))
            .collect();
        write(&mut file, &entries);
        let mut reader = reader(&file).await.with_max_open_transactions(3);
        reader.open(None).await.unwrap();

        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, ReaderError::Fatal(_)));
        assert!(err.to_string().contains("line 4"));
        assert!(reader.open_transactions() <= 3);
    }

    #[tokio::test]
    async fn keeps_a_transaction_open_while_streaming() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, &[JournalEntry::insert("dbo.t", None, row(1))]);
        let mut reader = reader(&file).await;
        reader.open(None).await.unwrap();
        reader.read().await.unwrap();

        assert_eq!(reader.main.lock().await.state(), ConnectionState::InTransaction);
        reader.close().await.unwrap();
    }
}
