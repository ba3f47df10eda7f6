use crate::error::JournalError;
use async_trait::async_trait;
use engine_core::{
    connection::{ConnectionFactory, ConnectionState, SourceConnection},
    error::ConnectionError,
};
use std::{
    collections::VecDeque,
    io::SeekFrom,
    path::{Path, PathBuf},
};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader},
};
use tracing::{debug, trace};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Read cursor over the journal: bytes and lines consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    bytes: u64,
    lines: u64,
}

/// A session over a journal file.
///
/// Lines are handed out only once they are complete. Inside a transaction the
/// cursor is checkpointed at `begin`; `rollback` rewinds to it so the lines
/// read since are delivered again.
pub struct JournalConnection {
    path: PathBuf,
    file: Option<File>,
    state: ConnectionState,
    auto_commit: bool,
    cursor: Cursor,
    checkpoint: Option<Cursor>,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    /// Complete lines not handed out yet, with their length in bytes.
    ready: VecDeque<(String, u64)>,
}

impl JournalConnection {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| ConnectionError::Connect(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Opened journal session");

        Ok(Self {
            path,
            file: Some(file),
            state: ConnectionState::Connected,
            auto_commit: true,
            cursor: Cursor::default(),
            checkpoint: None,
            buffer: Vec::new(),
            chunk: vec![0; READ_CHUNK_BYTES],
            ready: VecDeque::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Number of complete lines consumed so far; the last one handed out has
    /// this number.
    pub fn line(&self) -> u64 {
        self.cursor.lines
    }

    /// Up to `max` complete lines after the cursor, with their line numbers.
    pub async fn next_lines(&mut self, max: usize) -> Result<Vec<(u64, String)>, JournalError> {
        if self.ready.len() < max {
            self.fill(max).await?;
        }

        let mut lines = Vec::with_capacity(max.min(self.ready.len()));
        while lines.len() < max {
            let Some((line, len)) = self.ready.pop_front() else {
                break;
            };
            self.cursor.bytes += len + 1;
            self.cursor.lines += 1;
            lines.push((self.cursor.lines, line));
        }
        Ok(lines)
    }

    /// Moves the cursor back to the first line and drops any checkpoint.
    pub async fn rewind(&mut self) -> Result<(), JournalError> {
        let file = self.file.as_mut().ok_or(ConnectionError::Closed)?;
        file.seek(SeekFrom::Start(0)).await?;
        self.cursor = Cursor::default();
        self.checkpoint = None;
        self.buffer.clear();
        self.ready.clear();
        if self.state == ConnectionState::InTransaction {
            self.state = ConnectionState::Connected;
        }
        Ok(())
    }

    /// Counts the complete lines currently in the journal.
    pub async fn line_count(&self) -> Result<u64, JournalError> {
        self.ensure_open()?;
        let mut reader = BufReader::new(File::open(&self.path).await?);
        let mut lines = 0u64;
        loop {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                break;
            }
            lines += buf.iter().filter(|b| **b == b'\n').count() as u64;
            let len = buf.len();
            reader.consume(len);
        }
        Ok(lines)
    }

    /// Reads chunks until `wanted` lines are ready or the end of the journal.
    async fn fill(&mut self, wanted: usize) -> Result<(), JournalError> {
        let Self {
            file,
            buffer,
            chunk,
            ready,
            ..
        } = self;
        let file = file.as_mut().ok_or(ConnectionError::Closed)?;

        while ready.len() < wanted {
            let read = file.read(chunk).await?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            Self::split_lines(buffer, ready);
        }
        trace!(buffered = ready.len(), "Read journal tail");
        Ok(())
    }

    fn split_lines(buffer: &mut Vec<u8>, ready: &mut VecDeque<(String, u64)>) {
        let mut start = 0;
        while let Some(end) = buffer[start..].iter().position(|b| *b == b'\n') {
            let raw = &buffer[start..start + end];
            ready.push_back((String::from_utf8_lossy(raw).into_owned(), end as u64));
            start += end + 1;
        }
        buffer.drain(..start);
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.file.is_none() {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SourceConnection for JournalConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.auto_commit = enabled;
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if self.state == ConnectionState::InTransaction {
            return Err(ConnectionError::Transaction {
                operation: "begin",
                reason: "a transaction is already open".into(),
            });
        }
        self.checkpoint = Some(self.cursor);
        self.state = ConnectionState::InTransaction;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.checkpoint = None;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let Some(checkpoint) = self.checkpoint.take() else {
            self.state = ConnectionState::Connected;
            return Ok(());
        };

        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(checkpoint.bytes)).await?;
        }
        self.cursor = checkpoint;
        self.buffer.clear();
        self.ready.clear();
        self.state = ConnectionState::Connected;
        debug!(line = checkpoint.lines, "Rolled back journal session");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), line = self.cursor.lines, "Closed journal session");
        }
        self.checkpoint = None;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }
}

pub struct JournalConnectionFactory {
    path: PathBuf,
}

impl JournalConnectionFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConnectionFactory<JournalConnection> for JournalConnectionFactory {
    async fn connect(&self) -> Result<JournalConnection, ConnectionError> {
        JournalConnection::open(&self.path).await
    }
}
