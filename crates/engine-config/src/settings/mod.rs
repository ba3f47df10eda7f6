use crate::settings::error::SettingsError;
use model::core::identifiers::Partition;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

pub mod driver;
pub mod error;
pub mod validator;

/// Prefix for pass-through properties handed to the source driver.
pub const DRIVER_CONFIG_PREFIX: &str = "driver.";

/// Configuration of a single CDC task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Task name, also used as the logging context.
    pub name: String,
    /// Logical server name; identifies the partition and prefixes topics.
    pub server_name: String,
    pub database_name: String,

    /// How long `poll` waits for the first event of a batch.
    pub poll_interval_ms: u64,
    /// Upper bound of events returned by one `poll`.
    pub max_batch_size: usize,
    /// Number of events buffered before the reader is blocked.
    pub max_queue_size: usize,
    /// Aggregate event size buffered before the reader is blocked, 0 disables the limit.
    pub max_queue_size_in_bytes: usize,

    /// Rows fetched per round trip by the driver, 0 keeps the driver default.
    pub query_fetch_size: u32,
    /// Properties passed through to the driver, keyed with `driver.`.
    pub driver: BTreeMap<String, String>,

    /// Topic prefix, defaults to `server_name`.
    pub topic_prefix: Option<String>,
    /// `schema.table` names to capture; empty captures all tables.
    pub table_include_list: Vec<String>,
    /// `schema.table` names never captured.
    pub table_exclude_list: Vec<String>,

    /// Interval between heartbeat records, 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    pub retry: RetrySettings,
    /// Time given to the streaming loop to finish publishing on stop.
    pub shutdown_timeout_ms: u64,

    /// JSON-lines file polled for signals, none disables signalling.
    pub signal_file: Option<PathBuf>,
    pub signal_poll_interval_ms: u64,

    /// Connector specific options.
    pub source: serde_json::Value,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            server_name: String::new(),
            database_name: String::new(),
            poll_interval_ms: 500,
            max_batch_size: 2048,
            max_queue_size: 8192,
            max_queue_size_in_bytes: 0,
            query_fetch_size: 0,
            driver: BTreeMap::new(),
            topic_prefix: None,
            table_include_list: Vec::new(),
            table_exclude_list: Vec::new(),
            heartbeat_interval_ms: 0,
            retry: RetrySettings::default(),
            shutdown_timeout_ms: 5000,
            signal_file: None,
            signal_poll_interval_ms: 1000,
            source: serde_json::Value::Null,
        }
    }
}

/// Retry policy applied to transient reader failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl TaskConfig {
    pub fn from_json(source: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Reads a JSON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_json(&source)?;
        debug!(path = %path.display(), task = %config.name, "Loaded task configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        validator::SettingsValidator::new(self).validate()
    }

    /// The single partition streamed by this task.
    pub fn partition(&self) -> Partition {
        Partition::new(&self.server_name, &self.database_name)
    }

    pub fn topic_prefix(&self) -> &str {
        self.topic_prefix.as_deref().unwrap_or(&self.server_name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn signal_poll_interval(&self) -> Duration {
        Duration::from_millis(self.signal_poll_interval_ms)
    }

    /// Driver property without the `driver.` prefix.
    pub fn driver_property(&self, name: &str) -> Option<&str> {
        self.driver
            .get(&format!("{DRIVER_CONFIG_PREFIX}{name}"))
            .map(String::as_str)
    }

    /// Deserializes the connector specific `source` block.
    pub fn source_options<T: DeserializeOwned>(&self) -> Result<T, SettingsError> {
        serde_json::from_value(self.source.clone())
            .map_err(|e| SettingsError::SourceOptions(e.to_string()))
    }
}
