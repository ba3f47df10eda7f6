pub mod file;
pub mod processor;

use crate::error::SignalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use file::FileSignalChannel;
pub use processor::{SignalHandle, SignalProcessor};

/// A request sent to a running task from outside the change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Signal {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
        }
    }
}

/// Where signals come from.
#[async_trait]
pub trait SignalChannel: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Signals that arrived since the previous call.
    async fn read(&mut self) -> Result<Vec<Signal>, SignalError>;

    async fn close(&mut self) -> Result<(), SignalError> {
        Ok(())
    }
}
