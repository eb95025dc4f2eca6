//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate target URLs and bind addresses
//! - Validate value ranges (timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address for {section}: {value}")]
    BindAddress { section: &'static str, value: String },

    #[error("listener and management bind to the same address {0}")]
    SharedBindAddress(String),

    #[error("route '{route}' has an invalid target: {target}")]
    RouteTarget { route: String, target: String },

    #[error("route '{0}' must match on host or path prefix")]
    RouteWithoutCondition(String),

    #[error("transform override for client '{client}' is not a valid URL: {target}")]
    TransformTarget { client: String, target: String },

    #[error("auth url is not a valid URL: {0}")]
    AuthUrl(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_bind(&mut errors, "listener", &config.listener.bind_address);
    check_bind(&mut errors, "fallback", &config.fallback.bind_address);
    if config.management.enabled {
        check_bind(&mut errors, "management", &config.management.bind_address);
        // Port 0 asks the OS for a fresh port on each bind.
        if config.management.bind_address == config.listener.bind_address
            && !config.listener.bind_address.ends_with(":0")
        {
            errors.push(ValidationError::SharedBindAddress(
                config.listener.bind_address.clone(),
            ));
        }
    }

    for route in &config.routes {
        if !is_http_url(&route.target) {
            errors.push(ValidationError::RouteTarget {
                route: route.name.clone(),
                target: route.target.clone(),
            });
        }
        if route.host.is_none() && route.path_prefix.is_none() {
            errors.push(ValidationError::RouteWithoutCondition(route.name.clone()));
        }
    }

    if let Some(auth) = &config.auth {
        if !is_http_url(&auth.url) {
            errors.push(ValidationError::AuthUrl(auth.url.clone()));
        }
    }

    if let Some(quota) = &config.quota {
        if quota.requests_per_second == 0 {
            errors.push(ValidationError::Zero("quota.requests_per_second"));
        }
        if quota.burst == 0 {
            errors.push(ValidationError::Zero("quota.burst"));
        }
    }

    if let Some(transform) = &config.transform {
        for (client, target) in &transform.client_targets {
            if !is_http_url(target) {
                errors.push(ValidationError::TransformTarget {
                    client: client.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    if config.timeouts.checkpoint_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.checkpoint_ms"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.metrics.history_enabled && config.metrics.history_capacity == 0 {
        errors.push(ValidationError::Zero("metrics.history_capacity"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_bind(errors: &mut Vec<ValidationError>, section: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            section,
            value: value.to_string(),
        });
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
