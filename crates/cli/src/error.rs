use engine_config::SettingsError;
use engine_core::error::StateStoreError;
use engine_runtime::error::{ConvertError, TaskError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to load the task configuration: {0}")]
    Config(#[from] SettingsError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Failed to open the offset store: {0}")]
    Store(#[from] StateStoreError),

    #[error("Failed to convert record: {0}")]
    Convert(#[from] ConvertError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
