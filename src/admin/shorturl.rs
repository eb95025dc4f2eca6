//! Short-URL controller.
//!
//! - `POST /shorturl/encode` `{url, title?, auth?, trace?, quota?, transformRequest?}`
//!   → `{code: 0, result: {...}}`
//! - `POST /shorturl/decode` `{short_url}` or `{short_url_code}`
//!   → `{code: 0, result: {target_url, auth, trace, quota, transformRequest}}`
//! - `POST /shorturl/deleteByUrl` `{url}` → `{code: 0, result: "ok"}`
//!
//! Failures answer `{code: -1, msg}` with status 200; unknown paths 404.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::admin::controller::{
    ControllerDispatcher, ControllerRequest, ControllerResponse,
};
use crate::config::ShortUrlConfig;
use crate::routing::{ShortUrlOptions, ShortUrlStore};

fn fault(msg: &str) -> ControllerResponse {
    ControllerResponse::ok(json!({ "code": -1, "msg": msg }))
}

fn data(result: Value) -> ControllerResponse {
    ControllerResponse::ok(json!({ "code": 0, "msg": "ok", "result": result }))
}

/// Dispatcher for the short-URL controller.
pub struct ShortUrlController {
    store: ShortUrlStore,
    host: String,
    prefix: String,
}

impl ShortUrlController {
    pub fn new(config: &ShortUrlConfig, store: ShortUrlStore) -> Self {
        Self {
            store,
            host: config.host.trim_end_matches('/').to_string(),
            prefix: config.prefix.trim_end_matches('/').to_string(),
        }
    }

    fn target_url<'a>(request: &'a ControllerRequest) -> Result<&'a str, ControllerResponse> {
        if request.method != Method::POST {
            return Err(fault("request method != post"));
        }
        let url = request
            .body
            .json()
            .and_then(|b| b.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| fault("url is required"))?;
        match Url::parse(url) {
            Ok(_) => Ok(url),
            Err(_) => Err(fault("malformed url")),
        }
    }

    fn encode(&self, request: &ControllerRequest) -> ControllerResponse {
        let url = match Self::target_url(request) {
            Ok(url) => url,
            Err(answer) => return answer,
        };
        let title = request
            .body
            .json()
            .and_then(|b| b.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let options = request
            .body
            .json()
            .and_then(|b| serde_json::from_value::<ShortUrlOptions>(b.clone()).ok())
            .unwrap_or_default();

        let entry = self.store.get_or_insert(url, title, &options);
        data(json!({
            "short_url": format!("{}{}/{}", self.host, self.prefix, entry.code),
            "short_url_code": entry.code,
            "title": entry.title,
            "create_at": entry.create_at,
        }))
    }

    /// Accepts a full short URL, a `{prefix}/{code}` path or a bare code.
    fn decode(&self, request: &ControllerRequest) -> ControllerResponse {
        if request.method != Method::POST {
            return fault("request method != post");
        }
        let body = request.body.json();
        let given = body
            .and_then(|b| b.get("short_url_code"))
            .or_else(|| body.and_then(|b| b.get("short_url")))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let Some(given) = given else {
            return fault("short_url is required");
        };

        let path = given.strip_prefix(self.host.as_str()).unwrap_or(given);
        let code = path
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path);

        match self.store.by_code(code) {
            Some(entry) => {
                let mut result = json!({ "target_url": entry.target_url });
                if let (Value::Object(fields), Ok(Value::Object(options))) =
                    (&mut result, serde_json::to_value(&entry.options))
                {
                    fields.extend(options);
                }
                data(result)
            }
            None => fault("short url not found"),
        }
    }

    fn delete_by_url(&self, request: &ControllerRequest) -> ControllerResponse {
        let url = match Self::target_url(request) {
            Ok(url) => url,
            Err(answer) => return answer,
        };
        match self.store.remove_by_url(url) {
            Some(entry) => {
                tracing::info!(code = %entry.code, url = %url, "Short URL removed");
                data(Value::String("ok".into()))
            }
            None => fault("url not found"),
        }
    }
}

#[async_trait]
impl ControllerDispatcher for ShortUrlController {
    async fn dispatch(&self, request: ControllerRequest) -> ControllerResponse {
        match request.path.trim_end_matches('/') {
            "/shorturl/encode" => self.encode(&request),
            "/shorturl/decode" => self.decode(&request),
            "/shorturl/deleteByUrl" => self.delete_by_url(&request),
            _ => ControllerResponse::status(StatusCode::NOT_FOUND),
        }
    }
}
