use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Pair names are non-empty and unique
/// - Concurrency limits and queue capacities are at least 1
/// - Intervals are not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for pair in &config.pairs {
        if pair.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "pairs.name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(pair.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate pair name: {}",
                pair.name
            )));
        }
        if pair.interval_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pair {}: interval_secs cannot be 0",
                pair.name
            )));
        }
        if pair.feed_concurrency == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pair {}: feed_concurrency cannot be 0",
                pair.name
            )));
        }
        if pair.download_concurrency == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pair {}: download_concurrency cannot be 0",
                pair.name
            )));
        }
        if pair.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pair {}: queue_capacity cannot be 0",
                pair.name
            )));
        }
    }

    Ok(())
}
