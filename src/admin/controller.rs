//! JSON controller dispatch.
//!
//! # Responsibilities
//! - Present the inbound request to a dispatcher as a [`ControllerRequest`]
//! - Normalize whatever the dispatcher answers into an HTTP response
//!
//! # Normalization
//! - `Content-Type` defaults to `application/json; charset=utf-8` only when
//!   the dispatcher left it unset
//! - A missing body becomes the empty string
//! - A string body is written verbatim, anything else is serialized to JSON

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;
use serde_json::{json, Value};
use thiserror::Error;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Upper bound for a controller request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Failure to turn an inbound request into a [`ControllerRequest`].
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> axum::response::Response {
        tracing::debug!(error = %self, "Controller request rejected");
        ControllerResponse {
            status: StatusCode::BAD_REQUEST,
            headers: HeaderMap::new(),
            body: Some(json!({ "code": -1, "msg": self.to_string() })),
        }
        .into_http()
    }
}

/// Parsed request body.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerBody {
    Empty,
    Text(String),
    Json(Value),
}

impl ControllerBody {
    /// Parse raw bytes according to the request's content type.
    ///
    /// JSON is only parsed when `Content-Type` names `application/json`.
    pub fn parse(headers: &HeaderMap, bytes: Bytes) -> Result<Self, ControllerError> {
        if bytes.is_empty() {
            return Ok(ControllerBody::Empty);
        }
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
        if is_json {
            Ok(ControllerBody::Json(serde_json::from_slice(&bytes)?))
        } else {
            Ok(ControllerBody::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    /// JSON value of the body, if it was sent as JSON.
    pub fn json(&self) -> Option<&Value> {
        match self {
            ControllerBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Request handed to a dispatcher.
#[derive(Debug, Clone)]
pub struct ControllerRequest {
    pub method: Method,
    /// Path below the controllers prefix, always starting with `/`.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: ControllerBody,
}

/// Dispatcher answer before normalization.
#[derive(Debug, Clone)]
pub struct ControllerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ControllerResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Write the normalized HTTP response.
    pub fn into_http(self) -> Response<Body> {
        let body = match self.body {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if !response.headers().contains_key(header::CONTENT_TYPE) {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(JSON_CONTENT_TYPE),
            );
        }
        response
    }
}

/// Externally supplied controller logic.
#[async_trait]
pub trait ControllerDispatcher: Send + Sync {
    async fn dispatch(&self, request: ControllerRequest) -> ControllerResponse;
}
