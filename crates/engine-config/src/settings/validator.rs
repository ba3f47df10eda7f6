use crate::settings::{TaskConfig, error::SettingsError};
use model::core::identifiers::TableId;
use std::collections::HashSet;
use tracing::{info, warn};

/// Validates a task configuration before anything is opened.
pub struct SettingsValidator<'a> {
    config: &'a TaskConfig,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(config: &'a TaskConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_identity(&mut errors);
        self.validate_queue(&mut errors);
        self.validate_table_filters(&mut errors);
        self.validate_retry(&mut errors);
        self.validate_signals(&mut errors);

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        info!(task = %self.config.name, "Settings validation completed successfully");
        Ok(())
    }

    fn validate_identity(&self, errors: &mut Vec<String>) {
        if self.config.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if self.config.server_name.trim().is_empty() {
            errors.push("server_name must not be empty".to_string());
        }
    }

    fn validate_queue(&self, errors: &mut Vec<String>) {
        let config = self.config;

        if config.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be greater than 0".to_string());
        }
        if config.max_batch_size == 0 {
            errors.push("max_batch_size must be greater than 0".to_string());
        }
        if config.max_queue_size == 0 {
            errors.push("max_queue_size must be greater than 0".to_string());
        }
        if config.max_batch_size > config.max_queue_size {
            errors.push(format!(
                "max_batch_size ({}) must not exceed max_queue_size ({})",
                config.max_batch_size, config.max_queue_size
            ));
        }
        if config.max_queue_size > 1_000_000 {
            warn!(
                "max_queue_size {} is very large, may cause memory issues",
                config.max_queue_size
            );
        }
    }

    fn validate_table_filters(&self, errors: &mut Vec<String>) {
        let db = &self.config.database_name;
        let mut included = HashSet::new();

        for name in &self.config.table_include_list {
            match TableId::parse(db, name) {
                Ok(id) => {
                    included.insert(id);
                }
                Err(e) => errors.push(format!("table_include_list: {e}")),
            }
        }

        for name in &self.config.table_exclude_list {
            match TableId::parse(db, name) {
                Ok(id) if included.contains(&id) => {
                    errors.push(format!("table '{name}' is both included and excluded"));
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("table_exclude_list: {e}")),
            }
        }
    }

    fn validate_retry(&self, errors: &mut Vec<String>) {
        let retry = &self.config.retry;
        if retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if retry.max_delay_ms > 0 && retry.max_delay_ms < retry.base_delay_ms {
            errors.push("retry.max_delay_ms must not be lower than retry.base_delay_ms".to_string());
        }
    }

    fn validate_signals(&self, errors: &mut Vec<String>) {
        if self.config.signal_file.is_some() && self.config.signal_poll_interval_ms == 0 {
            errors.push("signal_poll_interval_ms must be greater than 0".to_string());
        }
    }
}
