use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::admin::controller::{ControllerBody, ControllerRequest, MAX_BODY_BYTES};
use crate::admin::ManagementState;

/// Remainder of `path` below `prefix`, if `path` lies under it.
fn below<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') || prefix.is_empty() {
        Some(rest)
    } else {
        None
    }
}

/// Single entry point; both routes are matched by path prefix.
pub async fn dispatch(State(state): State<ManagementState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();

    if let Some(prefix) = &state.metrics_prefix {
        if below(&path, prefix).is_some() {
            return scrape(&state).await;
        }
    }

    if let (Some(prefix), Some(_)) = (&state.controllers_prefix, &state.controllers) {
        if let Some(rest) = below(&path, prefix) {
            let rest = if rest.is_empty() { "/" } else { rest };
            return controller(&state, rest.to_string(), request).await;
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn scrape(state: &ManagementState) -> Response {
    let Some(exporter) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut response = Response::new(Body::from(exporter.scrape().await));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

async fn controller(state: &ManagementState, path: String, request: Request<Body>) -> Response {
    let Some(dispatcher) = &state.controllers else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return crate::admin::controller::ControllerError::from(e).into_response(),
    };
    let body = match ControllerBody::parse(&parts.headers, bytes) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };

    let answer = dispatcher
        .dispatch(ControllerRequest {
            method: parts.method,
            path,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        })
        .await;
    answer.into_http()
}
