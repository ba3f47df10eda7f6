pub mod settings;

pub use settings::{RetrySettings, TaskConfig, error::SettingsError};
