//! Service configuration: optional TOML file, then environment overrides

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use kl_common::{ConsumerConfig, OffsetReset};
use kl_router::RouterConfig;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Use Redis when set, otherwise an in-memory store
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
    pub key_prefix: String,
    /// Purge interval for the in-memory store
    pub purge_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: 3600,
            key_prefix: "kl:dedup:".to_string(),
            purge_interval_secs: 60,
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub consumer: ConsumerConfig,
    pub router: RouterConfig,
    pub dedup: DedupConfig,
}

impl AppConfig {
    /// Load from `path` (if given) and apply process environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(servers) = lookup("KAFKA_BOOTSTRAP_SERVERS") {
            self.consumer.bootstrap_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(group_id) = lookup("KAFKA_GROUP_ID") {
            self.consumer.group_id = group_id;
        }
        if let Some(reset) = lookup("KAFKA_AUTO_OFFSET_RESET") {
            self.consumer.auto_offset_reset = reset.parse::<OffsetReset>()?;
        }
        if let Some(ms) = lookup("READ_TIMEOUT_MS") {
            self.router.read_timeout_ms = ms.parse().context("READ_TIMEOUT_MS must be an integer")?;
        }
        if let Some(secs) = lookup("SHUTDOWN_TIMEOUT_SECS") {
            self.router.shutdown_timeout_secs =
                secs.parse().context("SHUTDOWN_TIMEOUT_SECS must be an integer")?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.dedup.redis_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(secs) = lookup("DEDUP_TTL_SECS") {
            self.dedup.ttl_secs = secs.parse().context("DEDUP_TTL_SECS must be an integer")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.consumer.bootstrap_servers, vec!["localhost:9092"]);
        assert_eq!(config.consumer.group_id, "default-group");
        assert_eq!(config.router.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.router.shutdown_timeout(), Duration::from_secs(30));
        assert!(config.dedup.redis_url.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(
            r#"
            [consumer]
            bootstrap_servers = ["kafka-1:9092", "kafka-2:9092"]
            group_id = "orders"
            auto_offset_reset = "latest"
            manual_offset_store = true

            [consumer.properties]
            "session.timeout.ms" = "6000"

            [router]
            read_timeout_ms = 500

            [dedup]
            ttl_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.consumer.bootstrap_servers_string(), "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.consumer.auto_offset_reset, OffsetReset::Latest);
        assert!(config.consumer.manual_offset_store);
        assert!(config.consumer.enable_auto_commit);
        assert_eq!(config.consumer.properties["session.timeout.ms"], "6000");
        assert_eq!(config.router.read_timeout_ms, 500);
        assert_eq!(config.router.shutdown_timeout_secs, 30);
        assert_eq!(config.dedup.ttl(), Duration::from_secs(120));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KAFKA_BOOTSTRAP_SERVERS", "a:9092, b:9092"),
            ("KAFKA_GROUP_ID", "billing"),
            ("KAFKA_AUTO_OFFSET_RESET", "latest"),
            ("READ_TIMEOUT_MS", "250"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
        ]);

        let mut config = AppConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.consumer.bootstrap_servers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.consumer.group_id, "billing");
        assert_eq!(config.consumer.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.router.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.dedup.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
    }

    #[test]
    fn test_invalid_override() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|name| (name == "READ_TIMEOUT_MS").then(|| "soon".to_string()));
        assert!(result.is_err());
    }
}
