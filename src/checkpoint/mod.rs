//! Checkpoint capabilities.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → RouteResolver   (route)      absent     → 404
//!     → Authenticator   (auth)       rejection  → 401
//!     → QuotaChecker    (quota)      rejection  → 403
//!     → Transformer     (transform)  rejection  → 500
//!     → ForwardTransport (forward)   error      → connection closed
//! ```
//!
//! # Design Decisions
//! - Each capability exposes one narrow async operation
//! - Capabilities report a plain `CapabilityError`; the pipeline decides
//!   which checkpoint failed and how that maps to a status
//! - Only route resolution is mandatory

pub mod auth;
pub mod quota;
pub mod transform;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::pipeline::context::{RequestContext, RouteTarget};

pub use auth::{build_authenticator, HttpAuthenticator};
pub use quota::TokenBucketQuota;
pub use transform::ClientTargetTransformer;

/// One named stage of the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    Route,
    Auth,
    Quota,
    Transform,
    Forward,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Route => "route",
            Checkpoint::Auth => "auth",
            Checkpoint::Quota => "quota",
            Checkpoint::Transform => "transform",
            Checkpoint::Forward => "forward",
        }
    }

    /// Status sent to the client when this checkpoint rejects a request.
    ///
    /// Forwarding failures never produce a mapped status; the value here is
    /// only used for the aborted response shell.
    pub fn failure_status(&self) -> StatusCode {
        match self {
            Checkpoint::Route => StatusCode::NOT_FOUND,
            Checkpoint::Auth => StatusCode::UNAUTHORIZED,
            Checkpoint::Quota => StatusCode::FORBIDDEN,
            Checkpoint::Transform => StatusCode::INTERNAL_SERVER_ERROR,
            Checkpoint::Forward => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection reported by a capability, carrying a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A checkpoint failure. Always recovered locally into a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("Not found")]
    RouteNotFound,

    #[error("{0}")]
    AuthFailure(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    TransformFailure(String),

    #[error("{0} checkpoint timed out after {1:?}")]
    Timeout(Checkpoint, Duration),
}

impl CheckpointError {
    /// Wrap a capability rejection as the failure of `stage`.
    pub fn rejected(stage: Checkpoint, err: CapabilityError) -> Self {
        match stage {
            Checkpoint::Route | Checkpoint::Forward => CheckpointError::RouteNotFound,
            Checkpoint::Auth => CheckpointError::AuthFailure(err.message),
            Checkpoint::Quota => CheckpointError::QuotaExceeded(err.message),
            Checkpoint::Transform => CheckpointError::TransformFailure(err.message),
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        match self {
            CheckpointError::RouteNotFound => Checkpoint::Route,
            CheckpointError::AuthFailure(_) => Checkpoint::Auth,
            CheckpointError::QuotaExceeded(_) => Checkpoint::Quota,
            CheckpointError::TransformFailure(_) => Checkpoint::Transform,
            CheckpointError::Timeout(stage, _) => *stage,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.checkpoint().failure_status()
    }
}

/// Resolves a request to a backend target.
#[async_trait]
pub trait RouteResolver: Send + Sync {
    /// `None` means no route matched.
    async fn resolve(&self, ctx: &RequestContext) -> Option<RouteTarget>;
}

/// Identifies the client behind a request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the principal. `response` holds headers added to whatever
    /// response the request eventually gets.
    async fn check(
        &self,
        ctx: &RequestContext,
        response: &mut HeaderMap,
    ) -> Result<String, CapabilityError>;
}

/// Enforces a per-client quota. Only consulted once a principal is known.
#[async_trait]
pub trait QuotaChecker: Send + Sync {
    async fn check(&self, ctx: &RequestContext) -> Result<(), CapabilityError>;
}

/// Result of a transform checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformResult {
    /// Replacement target, if any.
    pub target: Option<RouteTarget>,
}

/// Rewrites a request before it is forwarded.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn check(
        &self,
        principal: Option<&str>,
        ctx: &RequestContext,
        target: &RouteTarget,
    ) -> Result<TransformResult, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CheckpointError::RouteNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            CheckpointError::AuthFailure("invalid token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            CheckpointError::QuotaExceeded("rate limit exceeded".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CheckpointError::TransformFailure("bad".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CheckpointError::Timeout(Checkpoint::Quota, Duration::from_millis(10)).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_body_is_capability_message() {
        let err = CheckpointError::rejected(Checkpoint::Auth, CapabilityError::new("invalid token"));
        assert_eq!(err.to_string(), "invalid token");
        assert_eq!(CheckpointError::RouteNotFound.to_string(), "Not found");
    }
}
