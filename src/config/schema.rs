//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener configuration.
    pub listener: ListenerConfig,

    /// Management listener (metrics scrape + controllers).
    pub management: ManagementConfig,

    /// Route definitions mapping requests to backend targets.
    pub routes: Vec<RouteConfig>,

    /// Authentication backend. Absent = auth checkpoint skipped.
    pub auth: Option<AuthConfig>,

    /// Per-client quota. Absent = quota checkpoint skipped.
    pub quota: Option<QuotaConfig>,

    /// Request transformation. Absent = transform checkpoint skipped.
    pub transform: Option<TransformConfig>,

    /// Metrics aggregation settings.
    pub metrics: MetricsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Short-URL mapping settings.
    pub shorturl: ShortUrlConfig,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Error-reporting server used when startup fails.
    pub fallback: FallbackConfig,
}

/// Proxy listener configuration.
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

/// Management listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Start the management listener at all.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8081").
    pub bind_address: String,

    /// Path prefix of the metrics scrape route. `None` disables the route.
    pub metrics_prefix: Option<String>,

    /// Path prefix of the controller route. `None` disables the route.
    pub controllers_prefix: Option<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8081".to_string(),
            metrics_prefix: Some("/metrics".to_string()),
            controllers_prefix: Some("/api".to_string()),
        }
    }
}

/// Route configuration mapping requests to a backend target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Backend URL, e.g. "http://127.0.0.1:3000/api".
    pub target: String,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// HTTP authentication backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Token verification endpoint.
    pub url: String,

    /// Query parameter carrying the token on inbound requests.
    #[serde(default = "default_token_param")]
    pub query_param: String,

    /// Query parameter name used when calling the backend.
    #[serde(default = "default_token_param")]
    pub forward_param: String,

    /// Field of the backend `result` object holding the client id.
    #[serde(default = "default_client_id_field")]
    pub client_id_field: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            query_param: default_token_param(),
            forward_param: default_token_param(),
            client_id_field: default_client_id_field(),
        }
    }
}

fn default_token_param() -> String {
    "access_token".to_string()
}

fn default_client_id_field() -> String {
    "id".to_string()
}

/// Per-client token bucket.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Refill rate per client.
    pub requests_per_second: u32,

    /// Bucket capacity.
    pub burst: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst: 50,
        }
    }
}

/// Request transformation rules.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransformConfig {
    /// Client id -> replacement target URL.
    pub client_targets: HashMap<String, String>,
}

/// Metrics aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the scrape endpoint.
    pub enabled: bool,

    /// Counter name prefix (`{prefix}_access_total`).
    pub prefix: String,

    /// Run the historical single-flight fetch on each scrape.
    pub history_enabled: bool,

    /// Most request outcomes the in-memory history log keeps between scrapes.
    pub history_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "gateway".to_string(),
            history_enabled: false,
            history_capacity: 100_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single checkpoint capability call, in milliseconds.
    pub checkpoint_ms: u64,

    /// Upper bound for the upstream response head, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            checkpoint_ms: 5_000,
            request_secs: 30,
        }
    }
}

/// Short-URL mapping settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShortUrlConfig {
    /// Public host prepended to generated short URLs.
    pub host: String,

    /// Path prefix resolved by the short-URL resolver.
    pub prefix: String,
}

impl Default for ShortUrlConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8080".to_string(),
            prefix: "/s".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,

    /// Coloured output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "api_gateway=info,tower_http=info".to_string(),
            ansi: true,
        }
    }
}

/// Fallback error-reporting server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Bind address of the fallback server.
    pub bind_address: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}
