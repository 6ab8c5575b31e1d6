//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_MAX_FRAME;

/// Root configuration for the streaming proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Proxy engine tunables (5xx policy, retries, channel sizing).
    pub streaming: StreamingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Forwarding rules evaluated by the built-in predicate.
    pub rules: Vec<RuleConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Proxy engine settings, fixed at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Treat upstream 5xx answers as attempt failures.
    pub raise_on_5xx: bool,

    /// Extra attempts after an upstream 5xx (only with `raise_on_5xx`).
    pub num_5xx_retries: u32,

    /// Base delay between 5xx retries in milliseconds (0 = immediate).
    pub retry_base_delay_ms: u64,

    /// Cap on the retry delay in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Bytes the worker may write ahead of the reader.
    pub channel_capacity_bytes: usize,

    /// Largest single frame on the worker channel.
    pub max_frame_bytes: usize,

    /// Largest request body buffered for replay when retries are enabled.
    pub max_replay_body_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            raise_on_5xx: false,
            num_5xx_retries: 0,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 1000,
            channel_capacity_bytes: 64 * 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME,
            max_replay_body_bytes: 1024 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the upstream status line, in seconds.
    pub response_secs: u64,

    /// Deadline for a single worker channel write, in seconds.
    pub channel_write_secs: u64,

    /// Time allowed for the host to produce response headers, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            response_secs: 30,
            channel_write_secs: 30,
            request_secs: 30,
        }
    }
}

/// Forwarding rule for the built-in predicate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Rule identifier for logging.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Upstream base URL; the inbound path and query are appended.
    pub upstream: String,

    /// Rule priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_retries() {
        let config = ProxyConfig::default();
        assert!(!config.streaming.raise_on_5xx);
        assert_eq!(config.streaming.num_5xx_retries, 0);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_minimal_toml() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [streaming]
            raise_on_5xx = true
            num_5xx_retries = 2

            [[rules]]
            name = "search"
            path_prefix = "/search"
            upstream = "http://127.0.0.1:3000"
            "#,
        )
        .unwrap();

        assert!(config.streaming.raise_on_5xx);
        assert_eq!(config.streaming.num_5xx_retries, 2);
        assert_eq!(config.streaming.channel_capacity_bytes, 64 * 1024);
        assert_eq!(config.rules[0].priority, 0);
        assert_eq!(config.timeouts.connect_secs, 5);
    }
}
