//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, channel sizes)
//! - Check rule upstreams are usable absolute URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Smallest body-chunk frame limit. Header blocks have their own limit.
const MIN_FRAME_BYTES: usize = 1024;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("streaming.max_frame_bytes must be at least {} bytes", MIN_FRAME_BYTES)]
    FrameTooSmall,

    #[error("rule #{index} has an empty name")]
    UnnamedRule { index: usize },

    #[error("duplicate rule name {0:?}")]
    DuplicateRule(String),

    #[error("rule {rule:?} has an invalid upstream {upstream:?}: {reason}")]
    InvalidUpstream {
        rule: String,
        upstream: String,
        reason: String,
    },
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.response_secs", config.timeouts.response_secs),
        ("timeouts.channel_write_secs", config.timeouts.channel_write_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.streaming.channel_capacity_bytes == 0 {
        errors.push(ValidationError::Zero {
            field: "streaming.channel_capacity_bytes",
        });
    }
    if config.streaming.max_frame_bytes < MIN_FRAME_BYTES {
        errors.push(ValidationError::FrameTooSmall);
    }

    let mut names = HashSet::new();
    for (index, rule) in config.rules.iter().enumerate() {
        if rule.name.trim().is_empty() {
            errors.push(ValidationError::UnnamedRule { index });
        } else if !names.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateRule(rule.name.clone()));
        }

        if let Err(reason) = check_upstream(&rule.upstream) {
            errors.push(ValidationError::InvalidUpstream {
                rule: rule.name.clone(),
                upstream: rule.upstream.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(upstream: &str) -> Result<(), String> {
    let url = Url::parse(upstream).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are taken from the inbound request".to_string());
    }
    Ok(())
}
