use crate::journal::{
    connection::{JournalConnection, JournalConnectionFactory},
    reader::{DEFAULT_MAX_OPEN_TRANSACTIONS, JournalReader},
};
use engine_config::TaskConfig;
use engine_core::{
    connection::{ConnectionFactory, ConnectionHandle},
    schema::{DatabaseSchema, SledSchemaHistory},
};
use engine_runtime::{connector::SourceConnector, error::BoxError};
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

pub const CONNECTOR_NAME: &str = "journal";

fn default_lines_per_read() -> usize {
    1024
}

fn default_max_open_transactions() -> usize {
    DEFAULT_MAX_OPEN_TRANSACTIONS
}

/// The `source` block of a journal task.
#[derive(Debug, Clone, Deserialize)]
pub struct JournalOptions {
    pub path: PathBuf,
    /// Directory of the schema history, `<path>.history` when absent.
    #[serde(default)]
    pub schema_history_path: Option<PathBuf>,
    #[serde(default = "default_lines_per_read")]
    pub lines_per_read: usize,
    /// Uncommitted transactions buffered before the reader gives up.
    #[serde(default = "default_max_open_transactions")]
    pub max_open_transactions: usize,
}

impl JournalOptions {
    pub fn from_config(config: &TaskConfig) -> Result<Self, BoxError> {
        Ok(config.source_options()?)
    }

    pub fn history_path(&self) -> PathBuf {
        self.schema_history_path.clone().unwrap_or_else(|| {
            let mut path = self.path.clone().into_os_string();
            path.push(".history");
            PathBuf::from(path)
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct JournalConnector;

impl JournalConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SourceConnector for JournalConnector {
    type Connection = JournalConnection;
    type Reader = JournalReader;

    fn name(&self) -> &str {
        CONNECTOR_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn connection_factory(
        &self,
        config: &TaskConfig,
    ) -> Result<Box<dyn ConnectionFactory<JournalConnection>>, BoxError> {
        let options = JournalOptions::from_config(config)?;
        if let Some(fetch_size) = config.driver_property("fetchSize") {
            debug!(fetch_size, "Journal sessions ignore the driver fetch size");
        }
        Ok(Box::new(JournalConnectionFactory::new(options.path)))
    }

    fn schema(&self, config: &TaskConfig) -> Result<Arc<dyn DatabaseSchema>, BoxError> {
        let options = JournalOptions::from_config(config)?;
        Ok(Arc::new(SledSchemaHistory::new(
            options.history_path(),
            config.partition(),
        )))
    }

    fn reader(
        &self,
        config: &TaskConfig,
        main: ConnectionHandle<JournalConnection>,
        metadata: ConnectionHandle<JournalConnection>,
    ) -> Result<JournalReader, BoxError> {
        let options = JournalOptions::from_config(config)?;
        Ok(JournalReader::new(
            main,
            metadata,
            &config.database_name,
            options.lines_per_read,
        )
        .with_max_open_transactions(options.max_open_transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(source: serde_json::Value) -> TaskConfig {
        TaskConfig {
            name: "t".into(),
            server_name: "server1".into(),
            database_name: "inventory".into(),
            source,
            ..TaskConfig::default()
        }
    }

    #[test]
    fn reads_options_with_defaults() {
        let options =
            JournalOptions::from_config(&config(json!({ "path": "/data/journal.jsonl" }))).unwrap();
        assert_eq!(options.lines_per_read, 1024);
        assert_eq!(options.max_open_transactions, DEFAULT_MAX_OPEN_TRANSACTIONS);
        assert_eq!(
            options.history_path(),
            PathBuf::from("/data/journal.jsonl.history")
        );
    }

    #[test]
    fn explicit_history_path_wins() {
        let options = JournalOptions::from_config(&config(json!({
            "path": "/data/journal.jsonl",
            "schema_history_path": "/state/history",
        })))
        .unwrap();
        assert_eq!(options.history_path(), PathBuf::from("/state/history"));
    }

    #[test]
    fn missing_path_is_rejected() {
        let connector = JournalConnector::new();
        assert!(connector.connection_factory(&config(json!({}))).is_err());
        assert!(connector.schema(&config(serde_json::Value::Null)).is_err());
    }
}
