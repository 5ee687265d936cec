use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
}

impl Config {
    /// Looks up a pair entry by name.
    pub fn pair(&self, name: &str) -> Option<&PairConfig> {
        self.pairs.iter().find(|p| p.name == name)
    }
}

/// Timing and limits for one pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PairConfig {
    pub name: String,
    /// Wait before the first cycle (default: 0)
    #[serde(default)]
    pub initial_delay_secs: u64,
    /// Time between cycles (default: 1800, i.e. 30 minutes)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Sources pulling at once (default: 3)
    #[serde(default = "default_concurrency")]
    pub feed_concurrency: usize,
    /// Sink calls at once, across all sinks (default: 3)
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,
    /// Per-sink queue capacity (default: 100)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl PairConfig {
    /// An entry with every default filled in.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_delay_secs: 0,
            interval_secs: default_interval(),
            feed_concurrency: default_concurrency(),
            download_concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_interval() -> u64 {
    30 * 60
}

fn default_concurrency() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_pair_with_defaults() {
        let toml = r#"
[[pairs]]
name = "news"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pairs.len(), 1);
        assert_eq!(config.pairs[0], PairConfig::named("news"));
        assert_eq!(config.pairs[0].interval_secs, 1800);
        assert_eq!(config.pairs[0].queue_capacity, 100);
    }

    #[test]
    fn test_deserialize_pair_overrides() {
        let toml = r#"
[[pairs]]
name = "video"
initial_delay_secs = 60
interval_secs = 600
feed_concurrency = 1
download_concurrency = 5
queue_capacity = 10
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let pair = config.pair("video").unwrap();
        assert_eq!(pair.initial_delay_secs, 60);
        assert_eq!(pair.interval_secs, 600);
        assert_eq!(pair.feed_concurrency, 1);
        assert_eq!(pair.download_concurrency, 5);
        assert_eq!(pair.queue_capacity, 10);
    }

    #[test]
    fn test_deserialize_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.pairs.is_empty());
        assert!(config.pair("news").is_none());
    }

    #[test]
    fn test_deserialize_missing_name_fails() {
        let toml = r#"
[[pairs]]
interval_secs = 60
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
