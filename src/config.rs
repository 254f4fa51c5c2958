use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dns::Proto;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("can't parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub queries: QueriesConfig,
    pub events: EventsConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub interface: String,
    pub port: u16,
    pub protocols: Vec<Proto>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: 53,
            protocols: vec![Proto::Udp],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueriesConfig {
    pub flush_interval_secs: u64,
    pub buffer_size: usize,
    /// Spill file for batches the API rejected; absent disables spilling.
    pub failed_file: Option<PathBuf>,
}

impl Default for QueriesConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            buffer_size: 65536,
            failed_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    pub file: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Follow file holding the last persisted event cursor.
    pub file: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub exclude: ExcludeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExcludeConfig {
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.url.is_empty() {
            return Err(ConfigError::Invalid("api.url must be set".to_string()));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "api.timeout_secs must be positive".to_string(),
            ));
        }
        if self.network.port == 0 {
            return Err(ConfigError::Invalid(
                "network.port must be positive".to_string(),
            ));
        }
        if self.network.protocols.is_empty() {
            return Err(ConfigError::Invalid(
                "network.protocols must name at least one of udp, tcp".to_string(),
            ));
        }
        if self.queries.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "queries.buffer_size must be positive".to_string(),
            ));
        }
        if self.queries.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "queries.flush_interval_secs must be positive".to_string(),
            ));
        }
        if self.events.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "events.poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.queries.flush_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.events.poll_interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [api]
        url = "https://api.example.com/v1"
        key = "test-key"

        [network]
        interface = "eth0"
        protocols = ["udp", "tcp"]

        [queries]
        flush_interval_secs = 10
        buffer_size = 2048
        failed_file = "/var/lib/dnspipe/failed.ndjson"

        [events]
        file = "/var/lib/dnspipe/events.ndjson"
        poll_interval_secs = 60

        [data]
        file = "/var/lib/dnspipe/follow"

        [scope.groups.private]
        networks = ["10.0.0.0/8"]

        [scope.groups.private.exclude]
        networks = ["10.1.0.0/16"]
        domains = ["internal.example.com"]
    "#;

    fn parse(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn parses_full_config() {
        let config = parse(SAMPLE);
        config.validate().unwrap();

        assert_eq!(config.api.url, "https://api.example.com/v1");
        assert_eq!(config.api.key.as_deref(), Some("test-key"));
        assert_eq!(config.network.interface, "eth0");
        assert_eq!(config.network.port, 53);
        assert_eq!(config.network.protocols, vec![Proto::Udp, Proto::Tcp]);
        assert_eq!(config.queries.buffer_size, 2048);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(60));

        let group = &config.scope.groups["private"];
        assert_eq!(group.networks, vec!["10.0.0.0/8"]);
        assert_eq!(group.exclude.networks, vec!["10.1.0.0/16"]);
        assert_eq!(group.exclude.domains, vec!["internal.example.com"]);
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(
            r#"
            [api]
            url = "https://api.example.com/v1"

            [events]
            file = "events.ndjson"

            [data]
            file = "follow"
        "#,
        );
        config.validate().unwrap();

        assert_eq!(config.network.port, 53);
        assert_eq!(config.network.protocols, vec![Proto::Udp]);
        assert_eq!(config.queries.flush_interval_secs, 30);
        assert_eq!(config.queries.buffer_size, 65536);
        assert!(config.queries.failed_file.is_none());
        assert_eq!(config.events.poll_interval_secs, 30);
        assert!(config.scope.groups.is_empty());
    }

    #[test]
    fn missing_api_section_fails() {
        let result: Result<Config, _> = toml::from_str("[events]\nfile = \"e\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let mut config = parse(SAMPLE);
        config.queries.buffer_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_protocols_are_rejected() {
        let mut config = parse(SAMPLE);
        config.network.protocols.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_protocol_fails_to_parse() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [api]
            url = "u"
            [network]
            protocols = ["icmp"]
            [events]
            file = "e"
            [data]
            file = "d"
        "#,
        );
        assert!(result.is_err());
    }
}
