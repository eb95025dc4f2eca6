//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the resolved target
//! - Send it upstream and hand back the streaming response
//!
//! # Design Decisions
//! - Bodies stream in both directions; nothing is buffered
//! - Dropping the forward future (client gone) drops the upstream call

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::pipeline::context::RouteTarget;

/// Transport-level forwarding failure.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot build upstream request: {0}")]
    InvalidRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

/// Sends a request to a backend target.
#[async_trait]
pub trait ForwardTransport: Send + Sync {
    async fn forward(
        &self,
        request: Request<Body>,
        target: &RouteTarget,
    ) -> Result<Response<Body>, ForwardError>;
}

/// Plain-HTTP transport over a pooled hyper client.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

#[async_trait]
impl ForwardTransport for HyperTransport {
    async fn forward(
        &self,
        request: Request<Body>,
        target: &RouteTarget,
    ) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = target
            .upstream_uri(&parts.uri)
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
        if target.scheme != "http" {
            return Err(ForwardError::InvalidRequest(format!(
                "unsupported upstream scheme {}",
                target.scheme
            )));
        }

        let response: Response<Incoming> = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
