//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Reverse-proxy transport tuning.
    pub proxy: ProxyConfig,

    /// Key-value store used for tokens and counters.
    pub storage: StorageConfig,

    /// Where route and OAuth server definitions are read from.
    pub definitions: DefinitionsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Reverse-proxy transport configuration shared by every route.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Interval at which partial upstream output is flushed to the client.
    /// Zero forwards every upstream chunk as soon as it arrives.
    pub flush_interval_ms: u64,

    /// Maximum idle (keep-alive) connections kept per upstream host.
    pub max_idle_conns_per_host: usize,

    /// Period of the idle-connection eviction cycle. Zero disables it.
    pub close_idle_conns_period_secs: u64,

    /// Upstream connection establishment timeout.
    pub connect_timeout_secs: u64,

    /// Time allowed for the upstream to produce response headers.
    pub upstream_timeout_secs: u64,

    /// Overall inbound request timeout (until response headers).
    pub request_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn close_idle_conns_period(&self) -> Duration {
        Duration::from_secs(self.close_idle_conns_period_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 20,
            max_idle_conns_per_host: 64,
            close_idle_conns_period_secs: 60,
            connect_timeout_secs: 5,
            upstream_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

/// Key-value store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store DSN; the scheme selects the backend (e.g. `memory://localhost`).
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: "memory://localhost".to_string(),
        }
    }
}

/// Definition repository configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    /// Repository DSN (`file:///etc/gateway` or `memory://`).
    pub dsn: String,

    /// Reload automatically when the definitions directory changes.
    pub watch: bool,

    /// Quiet period after the last change before a watch-triggered reload.
    pub watch_debounce_ms: u64,
}

impl DefinitionsConfig {
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            dsn: "file:///etc/gateway".to_string(),
            watch: true,
            watch_debounce_ms: 250,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [proxy]
            flush_interval_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.proxy.flush_interval(), Duration::ZERO);
        assert_eq!(config.proxy.max_idle_conns_per_host, 64);
        assert_eq!(config.storage.dsn, "memory://localhost");
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert_eq!(config.definitions.watch_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn watch_debounce_is_configurable() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [definitions]
            dsn = "file:///srv/gateway"
            watch_debounce_ms = 1000
            "#,
        )
        .unwrap();
        assert!(config.definitions.watch);
        assert_eq!(config.definitions.watch_debounce(), Duration::from_secs(1));
    }

    #[test]
    fn log_format_parses_lowercase() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
