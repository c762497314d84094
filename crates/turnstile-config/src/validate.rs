use std::collections::HashSet;

use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.bridge.host.trim().is_empty() {
        errors.push(ConfigError::Validation {
            field: "bridge.host".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.bridge.port == 0 {
        errors.push(ConfigError::Validation {
            field: "bridge.port".to_string(),
            message: "must be non-zero".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for filter in &config.events.filters {
        if filter.trim().is_empty() {
            errors.push(ConfigError::Validation {
                field: "events.filters".to_string(),
                message: "filter names must not be empty".to_string(),
            });
        } else if !seen.insert(filter.as_str()) {
            errors.push(ConfigError::Validation {
                field: "events.filters".to_string(),
                message: format!("duplicate filter '{filter}'"),
            });
        }
    }

    for enabled in &config.events.enabled {
        if !seen.contains(enabled.as_str()) {
            errors.push(ConfigError::Validation {
                field: "events.enabled".to_string(),
                message: format!("'{enabled}' is not listed in events.filters"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
