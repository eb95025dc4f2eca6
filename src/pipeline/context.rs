//! Per-request state carried through the pipeline.
//!
//! # Responsibilities
//! - Stamp request identity (`x-request-id`) and receipt time (`x-request-at`)
//! - Hold the resolved target and principal as checkpoints run
//! - Track the lifecycle stage of the request
//!
//! # Design Decisions
//! - One context per request, never shared; mutated only by the pipeline
//! - Stage transitions are strictly ordered; `Failed` is terminal

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use url::Url;
use uuid::Uuid;

use crate::checkpoint::Checkpoint;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_REQUEST_AT: &str = "x-request-at";
pub const X_REQUEST_CLIENT: &str = "x-request-client";

/// Lifecycle stage of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    RouteResolved,
    Authenticated,
    QuotaChecked,
    Transformed,
    Forwarded,
    Completed,
    Failed(Checkpoint),
}

impl Stage {
    /// The only stage reachable from `self` on success.
    pub fn successor(self) -> Option<Stage> {
        match self {
            Stage::Received => Some(Stage::RouteResolved),
            Stage::RouteResolved => Some(Stage::Authenticated),
            Stage::Authenticated => Some(Stage::QuotaChecked),
            Stage::QuotaChecked => Some(Stage::Transformed),
            Stage::Transformed => Some(Stage::Forwarded),
            Stage::Forwarded => Some(Stage::Completed),
            Stage::Completed | Stage::Failed(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed(_))
    }
}

/// Backend descriptor produced by route resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Base path prepended to the forwarded path.
    pub path: String,
    /// Inbound path prefix removed before joining with `path`.
    pub strip_prefix: Option<String>,
}

impl RouteTarget {
    /// Parse an absolute `http`/`https` URL.
    pub fn parse(target: &str) -> Result<Self, InvalidTarget> {
        let url = Url::parse(target).map_err(|_| InvalidTarget(target.to_string()))?;
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(InvalidTarget(target.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| InvalidTarget(target.to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| InvalidTarget(target.to_string()))?;

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            path: url.path().trim_end_matches('/').to_string(),
            strip_prefix: None,
        })
    }

    pub fn with_strip_prefix(mut self, prefix: Option<String>) -> Self {
        self.strip_prefix = prefix;
        self
    }

    /// Build the upstream URI for an inbound path and query.
    pub fn upstream_uri(&self, inbound: &Uri) -> Result<Uri, InvalidTarget> {
        let mut path = inbound.path();
        if let Some(prefix) = &self.strip_prefix {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                path = rest;
            }
        }

        let mut joined = String::with_capacity(self.path.len() + path.len() + 1);
        joined.push_str(&self.path);
        if !path.is_empty() && !path.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(path);
        if joined.is_empty() {
            joined.push('/');
        }
        if let Some(query) = inbound.query() {
            joined.push('?');
            joined.push_str(query);
        }

        let uri = format!("{}://{}:{}{}", self.scheme, self.host, self.port, joined);
        uri.parse().map_err(|_| InvalidTarget(uri))
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// A target that is not an absolute http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid route target: {0}")]
pub struct InvalidTarget(pub String);

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// State of one inbound request.
#[derive(Debug)]
pub struct RequestContext {
    id: String,
    received_at: u64,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    target: Option<RouteTarget>,
    principal: Option<String>,
    stage: Stage,
}

impl RequestContext {
    /// Stamp a freshly accepted request.
    ///
    /// Keeps a non-empty inbound `x-request-id`, otherwise generates one, and
    /// writes both identity headers so they travel upstream.
    pub fn accept(method: Method, uri: Uri, mut headers: HeaderMap) -> Self {
        let inbound = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let id = match inbound {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    headers.insert(X_REQUEST_ID, value);
                }
                id
            }
        };

        let received_at = now_millis();
        headers.insert(X_REQUEST_AT, HeaderValue::from(received_at));

        Self {
            id,
            received_at,
            method,
            uri,
            headers,
            target: None,
            principal: None,
            stage: Stage::Received,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn received_at(&self) -> u64 {
        self.received_at
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn target(&self) -> Option<&RouteTarget> {
        self.target.as_ref()
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Host header without port, lowercased.
    pub fn host(&self) -> Option<String> {
        self.headers
            .get("host")
            .and_then(|h| h.to_str().ok())
            .or_else(|| self.uri.host())
            .map(|h| h.split(':').next().unwrap_or(h).to_lowercase())
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub(crate) fn set_target(&mut self, target: RouteTarget) {
        self.target = Some(target);
    }

    /// Record the authenticated principal and propagate it upstream.
    pub(crate) fn set_principal(&mut self, principal: String) {
        match HeaderValue::from_str(&principal) {
            Ok(value) => {
                self.headers.insert(X_REQUEST_CLIENT, value);
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %self.id,
                    client = %principal,
                    "Client id is not a valid header value, not propagated"
                );
            }
        }
        self.principal = Some(principal);
    }

    /// Move to the next stage.
    pub(crate) fn advance(&mut self, next: Stage) {
        debug_assert_eq!(
            self.stage.successor(),
            Some(next),
            "illegal stage transition {:?} -> {:?}",
            self.stage,
            next
        );
        self.stage = next;
    }

    pub(crate) fn fail(&mut self, at: Checkpoint) {
        debug_assert!(!self.stage.is_terminal());
        self.stage = Stage::Failed(at);
    }
}
