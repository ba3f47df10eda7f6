use super::{Signal, SignalChannel};
use crate::error::SignalError;
use async_trait::async_trait;
use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
};
use tracing::{debug, warn};

/// Reads signals appended to a JSON-lines file.
///
/// Each line is one signal, e.g. `{"id":"1","type":"log","data":{"message":"hi"}}`.
/// A line without its trailing newline is left for the next read. A file that
/// does not exist yet has no signals.
pub struct FileSignalChannel {
    path: PathBuf,
    position: u64,
}

impl FileSignalChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SignalChannel for FileSignalChannel {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&mut self) -> Result<Vec<Signal>, SignalError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if file.metadata().await?.len() < self.position {
            debug!(path = %self.path.display(), "Signal file was truncated, reading from start");
            self.position = 0;
        }
        file.seek(SeekFrom::Start(self.position)).await?;

        let mut reader = BufReader::new(file);
        let mut signals = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            self.position += read as u64;

            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(text) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Skipping malformed signal"
                ),
            }
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn append(path: &Path, text: &str) {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(text.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_has_no_signals() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = FileSignalChannel::new(dir.path().join("signals.jsonl"));

        assert!(channel.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_each_appended_signal_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.jsonl");
        let mut channel = FileSignalChannel::new(&path);

        append(
            &path,
            "{\"id\":\"1\",\"type\":\"log\",\"data\":{\"message\":\"hello\"}}\n\nnot json\n{\"id\":\"2\",\"type\":\"log\"",
        )
        .await;

        let first = channel.read().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "1");
        assert_eq!(first[0].data["message"], "hello");

        append(&path, "}\n").await;
        let second = channel.read().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "2");
        assert!(second[0].data.is_null());

        assert!(channel.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_file_is_read_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.jsonl");
        let mut channel = FileSignalChannel::new(&path);

        append(&path, "{\"id\":\"1\",\"type\":\"log\"}\n{\"id\":\"2\",\"type\":\"log\"}\n").await;
        assert_eq!(channel.read().await.unwrap().len(), 2);

        tokio::fs::write(&path, "{\"id\":\"3\",\"type\":\"log\"}\n")
            .await
            .unwrap();
        let signals = channel.read().await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "3");
    }
}
