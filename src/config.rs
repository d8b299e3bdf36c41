use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Shared store URL (`redis://host:6379`). Unset means process-local only.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Upper bound on any single backend call (and on each SCAN/DEL round-trip)
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// Upper bound on a whole pattern delete, which may take many round-trips
    #[serde(default = "default_pattern_timeout_ms")]
    pub pattern_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_local_entries")]
    pub max_local_entries: usize,
    /// How often the local store drops expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// SCAN COUNT hint for pattern deletes against the shared store
    #[serde(default = "default_scan_batch")]
    pub scan_batch: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_web_address")]
    pub address: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout_ms: default_op_timeout_ms(),
            pattern_timeout_ms: default_pattern_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_local_entries: default_max_local_entries(),
            sweep_interval_secs: default_sweep_interval(),
            scan_batch: default_scan_batch(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_web_address(),
            port: default_web_port(),
        }
    }
}

// Default value functions
fn default_op_timeout_ms() -> u64 { 500 }
fn default_pattern_timeout_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 2000 }
fn default_max_local_entries() -> usize { 100_000 }
fn default_sweep_interval() -> u64 { 30 }
fn default_scan_batch() -> usize { 500 }
fn default_true() -> bool { true }
fn default_web_address() -> String { "0.0.0.0".to_string() }
fn default_web_port() -> u16 { 8080 }

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    /// `REDIS_URL` in the environment overrides `cache.redis_url`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
            Self::parse(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("REDIS_URL") {
            if !url.trim().is_empty() {
                config.cache.redis_url = Some(url);
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.cache.redis_url.is_none());
        assert_eq!(config.cache.op_timeout_ms, 500);
        assert_eq!(config.cache.pattern_timeout_ms, 30_000);
        assert_eq!(config.cache.max_local_entries, 100_000);
        assert!(config.web.enabled);
        assert_eq!(config.web.port, 8080);
    }

    #[test]
    fn test_partial_section() {
        let config = Config::parse(
            r#"
            [cache]
            redis_url = "redis://127.0.0.1:6379"
            op_timeout_ms = 250

            [web]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.cache.op_timeout_ms, 250);
        assert_eq!(config.cache.scan_batch, 500);
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.address, "0.0.0.0");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::parse("[cache\nredis_url = 1").is_err());
    }
}
