//! Node configuration.
//!
//! Loaded from a TOML file layered with `REPLICELL_`-prefixed
//! environment overrides. Every section has defaults so a node can run
//! without a config file at all.

use serde::{Deserialize, Serialize};

use replicell_common::DEFAULT_SUBJECT_PREFIX;

/// Top-level configuration for a replicell node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicellConfig {
    /// Node identity settings.
    pub node: NodeSection,
    /// NATS messaging configuration.
    pub nats: NatsConfig,
    /// Demonstration driver loop intervals.
    pub driver: DriverConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Prometheus metrics exporter.
    pub metrics: MetricsConfig,
    /// Management API.
    pub management: ManagementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Node id; normally supplied on the command line, which takes
    /// precedence over this value.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Subject prefix for all replicell traffic.
    pub subject_prefix: String,
    /// Per-request timeout in milliseconds. Blocking token requests
    /// are bounded by this as well, so keep it generous.
    pub request_timeout_ms: u64,
    /// How long a directory listing collects discovery replies.
    pub discovery_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Initializer: seconds between value log lines.
    pub status_interval_secs: u64,
    /// Reader: seconds between reads.
    pub read_interval_secs: u64,
    /// Writer: seconds between writes.
    pub write_interval_secs: u64,
    /// Writer: amount added on every write.
    pub write_increment: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset.
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Listen address for the Prometheus exporter.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    pub enabled: bool,
    /// Listen address for the management API.
    pub listen_addr: String,
}

impl Default for ReplicellConfig {
    fn default() -> Self {
        Self {
            node: NodeSection { id: None },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
                request_timeout_ms: 30_000,
                discovery_window_ms: 500,
            },
            driver: DriverConfig {
                status_interval_secs: 2,
                read_interval_secs: 1,
                write_interval_secs: 5,
                write_increment: 10,
            },
            logging: LoggingConfig {
                level: "replicell_node=info".to_string(),
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "127.0.0.1:9600".to_string(),
            },
            management: ManagementConfig {
                enabled: false,
                listen_addr: "127.0.0.1:9601".to_string(),
            },
        }
    }
}

impl ReplicellConfig {
    /// Load configuration from a file, layered with environment
    /// variables prefixed `REPLICELL_`.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("REPLICELL").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.subject_prefix.is_empty() {
            return Err("subject prefix cannot be empty".to_string());
        }
        if self.nats.request_timeout_ms == 0 {
            return Err("request timeout cannot be 0".to_string());
        }
        if self.nats.discovery_window_ms == 0 {
            return Err("discovery window cannot be 0".to_string());
        }
        if self.driver.write_interval_secs == 0 || self.driver.read_interval_secs == 0 {
            return Err("driver intervals cannot be 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ReplicellConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nats.subject_prefix, "replicell");
        assert_eq!(config.driver.write_increment, 10);
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let mut config = ReplicellConfig::default();
        config.nats.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp config");
        let mut default = ReplicellConfig::default();
        default.node.id = Some("A".to_string());
        let rendered = toml::to_string_pretty(&default).expect("serialize config");
        file.write_all(rendered.as_bytes()).expect("write config");

        let path = file.path().to_str().expect("utf-8 path");
        let loaded = ReplicellConfig::from_file(path.trim_end_matches(".toml"))
            .expect("load config from file");
        assert_eq!(loaded.nats.url, default.nats.url);
        assert_eq!(
            loaded.driver.status_interval_secs,
            default.driver.status_interval_secs
        );
    }
}
