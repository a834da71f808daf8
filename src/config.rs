//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::store::StoreSettings;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Throttling key configuration
    #[serde(default)]
    pub keying: KeyingConfig,

    /// Privileged-identity bypass configuration
    #[serde(default)]
    pub bypass: BypassConfig,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            keying: KeyingConfig::default(),
            bypass: BypassConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Address of the shared counter store. When absent, counters are kept
    /// per-instance in process memory.
    pub shared_url: Option<String>,

    /// Prefix applied to every key written to the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Initial reconnect delay in milliseconds
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shared_url: None,
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_op_timeout_ms() -> u64 {
    250
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

/// Throttling key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyingConfig {
    /// Trusted forwarding header consulted for origin keys when the service
    /// sits behind a reverse proxy
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
}

impl Default for KeyingConfig {
    fn default() -> Self {
        Self {
            forwarded_header: default_forwarded_header(),
        }
    }
}

fn default_forwarded_header() -> String {
    "x-forwarded-for".to_string()
}

/// Privileged-identity bypass configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BypassConfig {
    /// Principal identifiers exempt from admission control
    #[serde(default)]
    pub principal_ids: Vec<String>,
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides.
    ///
    /// `TURNSTILE_STORE_URL` selects the shared counter store address; when
    /// it is unset and no file provides one, the local fallback is used.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("TURNSTILE_STORE_URL") {
            if !url.is_empty() {
                config.store.shared_url = Some(url);
            }
        }

        Ok(config)
    }
}

impl From<&StoreConfig> for StoreSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            shared_url: config.shared_url.clone(),
            key_prefix: config.key_prefix.clone(),
            op_timeout: Duration::from_millis(config.op_timeout_ms),
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(config.store.shared_url.is_none());
        assert_eq!(config.store.key_prefix, "turnstile:");
        assert_eq!(config.keying.forwarded_header, "x-forwarded-for");
        assert!(config.bypass.principal_ids.is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
store:
  shared_url: "redis://counter-store:6379"
  op_timeout_ms: 100
bypass:
  principal_ids:
    - ops-dashboard
"#;
        let config: TurnstileConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.store.shared_url.as_deref(),
            Some("redis://counter-store:6379")
        );
        assert_eq!(config.store.op_timeout_ms, 100);
        // Unspecified fields keep their defaults
        assert_eq!(config.store.reconnect_base_ms, 1_000);
        assert_eq!(config.bypass.principal_ids, vec!["ops-dashboard"]);
    }

    #[test]
    fn test_env_override_selects_shared_store() {
        std::env::set_var("TURNSTILE_STORE_URL", "redis://from-env:6379");
        let config = TurnstileConfig::load(None).unwrap();
        std::env::remove_var("TURNSTILE_STORE_URL");

        assert_eq!(
            config.store.shared_url.as_deref(),
            Some("redis://from-env:6379")
        );
    }

    #[test]
    fn test_store_settings_conversion() {
        let store = StoreConfig {
            shared_url: Some("redis://example:6379".to_string()),
            op_timeout_ms: 500,
            ..StoreConfig::default()
        };
        let settings = StoreSettings::from(&store);

        assert_eq!(settings.shared_url.as_deref(), Some("redis://example:6379"));
        assert_eq!(settings.op_timeout, Duration::from_millis(500));
        assert_eq!(settings.reconnect_max, Duration::from_secs(60));
    }
}
