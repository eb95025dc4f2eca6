//! End-to-end tests through real proxy and management listeners.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_gateway::config::{AuthConfig, QuotaConfig};
use reqwest::StatusCode;
use serde_json::Value;

mod common;

#[tokio::test]
async fn test_forwards_and_stamps_identity() {
    let backend = common::start_echo_backend().await;
    let gw = common::spawn_gateway(common::loopback_config(vec![common::route(
        "api", "/api", backend,
    )]))
    .await;
    let client = common::client();

    let echoed: Value = client
        .get(format!("{}/api/orders?page=2", gw.proxy))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["path"], "/api/orders");
    assert_eq!(echoed["query"], "page=2");
    assert!(!echoed["request_id"].as_str().unwrap().is_empty());
    assert!(echoed["request_at"].as_str().unwrap().parse::<u64>().is_ok());
    assert!(echoed["client"].is_null());

    let echoed: Value = client
        .get(format!("{}/api/orders", gw.proxy))
        .header("x-request-id", "trace-42")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["request_id"], "trace-42");
}

#[tokio::test]
async fn test_unrouted_request_is_404() {
    let backend = common::start_echo_backend().await;
    let gw = common::spawn_gateway(common::loopback_config(vec![common::route(
        "api", "/api", backend,
    )]))
    .await;

    let res = common::client()
        .get(format!("{}/elsewhere", gw.proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "Not found");
}

#[tokio::test]
async fn test_upstream_status_passes_through() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, "busy".to_string())
        }
    })
    .await;
    let gw = common::spawn_gateway(common::loopback_config(vec![common::route(
        "api", "/", backend,
    )]))
    .await;

    let res = common::client().get(format!("{}/x", gw.proxy)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "busy");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auth_and_quota_checkpoints() {
    let backend = common::start_echo_backend().await;
    let auth = common::start_auth_backend().await;

    let mut config = common::loopback_config(vec![common::route("api", "/api", backend)]);
    config.auth = Some(AuthConfig {
        url: format!("http://{auth}/auth"),
        ..Default::default()
    });
    config.quota = Some(QuotaConfig {
        requests_per_second: 1,
        burst: 1,
    });
    let gw = common::spawn_gateway(config).await;
    let client = common::client();

    let res = client.get(format!("{}/api/a", gw.proxy)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.text().await.unwrap(), "missing access token");

    let res = client
        .get(format!("{}/api/a?access_token=bad", gw.proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.text().await.unwrap(), "invalid token");

    let echoed: Value = client
        .get(format!("{}/api/a?access_token=good", gw.proxy))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["client"], "alice");

    let res = client
        .get(format!("{}/api/a?access_token=good", gw.proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "rate limit exceeded");

    // Buckets are per client.
    let res = client
        .get(format!("{}/api/a?access_token=other", gw.proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forward_failure_drops_connection() {
    let dead = common::closed_port().await;
    let gw = common::spawn_gateway(common::loopback_config(vec![common::route(
        "dead", "/", dead,
    )]))
    .await;
    let client = common::client();

    match client.get(format!("{}/x", gw.proxy)).send().await {
        Ok(res) => assert!(res.bytes().await.is_err(), "body must not complete"),
        Err(_) => {}
    }

    let exposition = client
        .get(format!("{}/metrics", gw.management))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(common::access_total(&exposition, "sendFail", "all"), Some(1));
    assert_eq!(common::access_total(&exposition, "sendSuccess", "all"), Some(0));
}

#[tokio::test]
async fn test_slow_upstream_is_forward_failure() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let mut config = common::loopback_config(vec![common::route("slow", "/", backend)]);
    config.timeouts.request_secs = 1;
    let gw = common::spawn_gateway(config).await;
    let client = common::client();

    let started = Instant::now();
    match client.get(format!("{}/x", gw.proxy)).send().await {
        Ok(res) => {
            assert_ne!(res.status(), StatusCode::REQUEST_TIMEOUT);
            assert!(res.bytes().await.is_err(), "body must not complete");
        }
        Err(_) => {}
    }
    assert!(started.elapsed() < Duration::from_secs(3));

    let exposition = client
        .get(format!("{}/metrics", gw.management))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(common::access_total(&exposition, "sendAll", "all"), Some(1));
    assert_eq!(common::access_total(&exposition, "sendFail", "all"), Some(1));
    assert_eq!(common::access_total(&exposition, "sendSuccess", "all"), Some(0));
}

#[tokio::test]
async fn test_scrape_includes_history_totals() {
    let backend = common::start_programmable_backend(move || async { (503, "down".to_string()) }).await;
    let echo = common::start_echo_backend().await;
    let mut config = common::loopback_config(vec![
        common::route("broken", "/broken", backend),
        common::route("api", "/api", echo),
    ]);
    config.metrics.history_enabled = true;
    let gw = common::spawn_gateway(config).await;
    let client = common::client();

    let scrape = || async {
        client
            .get(format!("{}/metrics", gw.management))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    };

    client.get(format!("{}/api/a", gw.proxy)).send().await.unwrap();
    client.get(format!("{}/broken", gw.proxy)).send().await.unwrap();
    let first = scrape().await;
    assert_eq!(common::history_total(&first, "all"), Some(2));
    assert_eq!(common::history_total(&first, "fail"), Some(1));

    client.get(format!("{}/api/b", gw.proxy)).send().await.unwrap();
    let second = scrape().await;
    assert_eq!(common::history_total(&second, "all"), Some(3));
    assert_eq!(common::history_total(&second, "fail"), Some(1));
    assert_eq!(common::access_total(&second, "sendAll", "all"), Some(3));
}

#[tokio::test]
async fn test_scrape_is_cumulative_and_per_client() {
    let backend = common::start_echo_backend().await;
    let auth = common::start_auth_backend().await;
    let mut config = common::loopback_config(vec![common::route("api", "/api", backend)]);
    config.auth = Some(AuthConfig {
        url: format!("http://{auth}/auth"),
        ..Default::default()
    });
    let gw = common::spawn_gateway(config).await;
    let client = common::client();

    for _ in 0..2 {
        client
            .get(format!("{}/api/a?access_token=good", gw.proxy))
            .send()
            .await
            .unwrap();
    }
    client.get(format!("{}/nowhere", gw.proxy)).send().await.unwrap();

    let scrape = || async {
        client
            .get(format!("{}/metrics", gw.management))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    };

    let first = scrape().await;
    assert_eq!(common::access_total(&first, "all", "all"), Some(3));
    assert_eq!(common::access_total(&first, "sendAll", "all"), Some(2));
    assert_eq!(common::access_total(&first, "sendSuccess", "all"), Some(2));
    assert_eq!(common::access_total(&first, "sendAll", "alice"), Some(2));
    assert_eq!(common::access_total(&first, "sendFail", "alice"), Some(0));

    client
        .get(format!("{}/api/a?access_token=good", gw.proxy))
        .send()
        .await
        .unwrap();
    let second = scrape().await;
    assert_eq!(common::access_total(&second, "all", "all"), Some(4));
    assert_eq!(common::access_total(&second, "sendSuccess", "alice"), Some(3));
}

#[tokio::test]
async fn test_short_url_round_trip() {
    let backend = common::start_echo_backend().await;
    let gw = common::spawn_gateway(common::loopback_config(vec![])).await;
    let client = common::client();

    let encoded: Value = client
        .post(format!("{}/api/shorturl/encode", gw.management))
        .json(&serde_json::json!({"url": format!("http://{backend}/landing"), "title": "landing"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(encoded["code"], 0);
    let code = encoded["result"]["short_url_code"].as_str().unwrap().to_string();

    let echoed: Value = client
        .get(format!("{}/s/{code}", gw.proxy))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["path"], "/landing");

    let deleted: Value = client
        .post(format!("{}/api/shorturl/deleteByUrl", gw.management))
        .json(&serde_json::json!({"url": format!("http://{backend}/landing")}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["code"], 0);

    let res = client.get(format!("{}/s/{code}", gw.proxy)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_management_unknown_path_is_404() {
    let gw = common::spawn_gateway(common::loopback_config(vec![])).await;
    let res = common::client()
        .get(format!("{}/status", gw.management))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
