use crate::settings::{DRIVER_CONFIG_PREFIX, TaskConfig};

/// Applies the fetch size to the driver properties.
///
/// By default the driver should not load whole result sets into memory, so a
/// positive `query_fetch_size` turns on adaptive buffering and sets the driver
/// fetch size. Properties the user already set are left untouched.
pub fn apply_fetch_size(config: &TaskConfig) -> TaskConfig {
    let mut config = config.clone();
    if config.query_fetch_size == 0 {
        return config;
    }

    let fetch_size = config.query_fetch_size.to_string();
    config
        .driver
        .entry(format!("{DRIVER_CONFIG_PREFIX}responseBuffering"))
        .or_insert_with(|| "adaptive".to_string());
    config
        .driver
        .entry(format!("{DRIVER_CONFIG_PREFIX}fetchSize"))
        .or_insert(fetch_size);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_driver_untouched_without_fetch_size() {
        let config = apply_fetch_size(&TaskConfig::default());
        assert!(config.driver.is_empty());
    }

    #[test]
    fn adds_defaults_for_positive_fetch_size() {
        let config = apply_fetch_size(&TaskConfig {
            query_fetch_size: 500,
            ..TaskConfig::default()
        });
        assert_eq!(config.driver_property("responseBuffering"), Some("adaptive"));
        assert_eq!(config.driver_property("fetchSize"), Some("500"));
    }

    #[test]
    fn explicit_driver_properties_win() {
        let mut base = TaskConfig {
            query_fetch_size: 500,
            ..TaskConfig::default()
        };
        base.driver
            .insert("driver.responseBuffering".into(), "full".into());

        let config = apply_fetch_size(&base);
        assert_eq!(config.driver_property("responseBuffering"), Some("full"));
        assert_eq!(config.driver_property("fetchSize"), Some("500"));
    }
}
