//! HTTP token authentication.
//!
//! The inbound token is read from a query parameter and verified against an
//! external backend answering `{"code": 0, "result": {...}}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::checkpoint::{Authenticator, CapabilityError};
use crate::config::AuthConfig;
use crate::pipeline::context::RequestContext;

#[derive(Debug, Deserialize)]
struct AuthReply {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Authenticator backed by an HTTP verification endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: reqwest::Client,
    url: String,
    query_param: String,
    forward_param: String,
    client_id_field: String,
}

impl HttpAuthenticator {
    pub fn new(config: &AuthConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            query_param: config.query_param.clone(),
            forward_param: config.forward_param.clone(),
            client_id_field: config.client_id_field.clone(),
        })
    }

    fn client_id(&self, result: Option<&Value>) -> Option<String> {
        match result?.get(&self.client_id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn check(
        &self,
        ctx: &RequestContext,
        _response: &mut HeaderMap,
    ) -> Result<String, CapabilityError> {
        let token = ctx
            .query_param(&self.query_param)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CapabilityError::new("missing access token"))?;

        let reply: AuthReply = self
            .client
            .get(&self.url)
            .query(&[(self.forward_param.as_str(), token.as_str())])
            .send()
            .await
            .map_err(|e| CapabilityError::new(format!("auth backend unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| CapabilityError::new(format!("invalid auth backend reply: {e}")))?;

        if reply.code != 0 {
            return Err(CapabilityError::new(
                reply.msg.unwrap_or_else(|| "authentication failed".to_string()),
            ));
        }

        self.client_id(reply.result.as_ref())
            .ok_or_else(|| CapabilityError::new("client id missing from auth reply"))
    }
}

/// Build the configured authenticator once at startup.
pub fn build_authenticator(
    config: Option<&AuthConfig>,
    timeout: Duration,
) -> Result<Option<Arc<dyn Authenticator>>, reqwest::Error> {
    match config {
        Some(config) => {
            let auth = HttpAuthenticator::new(config, timeout)?;
            tracing::info!(url = %config.url, "HTTP authenticator configured");
            Ok(Some(Arc::new(auth)))
        }
        None => Ok(None),
    }
}
