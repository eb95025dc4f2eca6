//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::{GatewayConfig, RouteConfig};
use api_gateway::lifecycle::{Gateway, Shutdown};
use axum::{extract::Query, http::HeaderMap, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a backend answering every request with its path and the gateway
/// identity headers as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    async fn echo(uri: axum::http::Uri, headers: HeaderMap) -> Json<Value> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "path": uri.path(),
            "query": uri.query(),
            "request_id": header("x-request-id"),
            "request_at": header("x-request-at"),
            "client": header("x-request-client"),
        }))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(echo)).await.unwrap();
    });
    addr
}

/// Start an auth backend accepting the tokens `good` (alice) and `other` (bob).
pub async fn start_auth_backend() -> SocketAddr {
    async fn verify(Query(q): Query<std::collections::HashMap<String, String>>) -> Json<Value> {
        match q.get("access_token").map(String::as_str) {
            Some("good") => Json(json!({"code": 0, "result": {"id": "alice"}})),
            Some("other") => Json(json!({"code": 0, "result": {"id": "bob"}})),
            _ => Json(json!({"code": 401, "msg": "invalid token"})),
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/auth", get(verify)))
            .await
            .unwrap();
    });
    addr
}

/// Start a programmable raw-TCP backend; `f` picks status and body per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                // Consume the request head before answering.
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while let Ok(n) = socket.read(&mut buf[read..]).await {
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                        break;
                    }
                }

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn route(name: &str, prefix: &str, target: SocketAddr) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        host: None,
        path_prefix: Some(prefix.into()),
        target: format!("http://{target}"),
        strip_prefix: false,
        priority: 0,
    }
}

/// Gateway config with both listeners on ephemeral loopback ports.
pub fn loopback_config(routes: Vec<RouteConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.management.bind_address = "127.0.0.1:0".into();
    config.timeouts.checkpoint_ms = 2_000;
    config.routes = routes;
    config
}

pub struct RunningGateway {
    pub proxy: String,
    pub management: String,
    pub shutdown: Shutdown,
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> RunningGateway {
    let gateway = Gateway::bind(config).await.expect("gateway binds");
    let proxy = format!("http://{}", gateway.proxy_addr().unwrap());
    let management = gateway
        .management_addr()
        .map(|a| format!("http://{a}"))
        .unwrap_or_default();

    let shutdown = Shutdown::new();
    let serving = shutdown.clone();
    tokio::spawn(async move {
        let _ = gateway.serve(&serving).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    RunningGateway {
        proxy,
        management,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Value of `{prefix}_access_total` for one label pair in an exposition.
pub fn access_total(exposition: &str, status: &str, client: &str) -> Option<u64> {
    let status = format!("status=\"{status}\"");
    let client = format!("client=\"{client}\"");
    exposition
        .lines()
        .filter(|l| l.starts_with("gateway_access_total{"))
        .find(|l| l.contains(&status) && l.contains(&client))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

/// Value of `{prefix}_history_total` for one status in an exposition.
pub fn history_total(exposition: &str, status: &str) -> Option<u64> {
    let status = format!("status=\"{status}\"");
    exposition
        .lines()
        .filter(|l| l.starts_with("gateway_history_total{"))
        .find(|l| l.contains(&status))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}
