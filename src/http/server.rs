//! Proxy listener.
//!
//! # Responsibilities
//! - Create the Axum router catching every method and path
//! - Wire up middleware (tracing, request timeout)
//! - Drive each request through the checkpoint pipeline
//! - Drop the connection when forwarding fails
//! - Serve until shutdown is signalled

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use futures_util::stream;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::transport::ForwardError;
use crate::pipeline::Pipeline;

const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub pipeline: Arc<Pipeline>,
}

/// HTTP server for the proxy listener.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// The request timeout sits past the pipeline deadline, so a slow
    /// upstream always ends as a forward failure first.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let request_timeout = pipeline.deadline() + DEADLINE_GRACE;
        let state = ProxyState { pipeline };
        Self {
            router: Self::build_router(state, request_timeout),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: ProxyState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Proxy listener starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Proxy listener stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    match state.pipeline.handle(request).await {
        Ok(response) => response,
        Err(err) => aborted_response(err),
    }
}

/// A response whose body fails immediately, so the server tears the
/// connection down instead of completing a reply.
fn aborted_response(err: ForwardError) -> Response {
    let failure = stream::once(async move { Err::<Bytes, io::Error>(io::Error::other(err.to_string())) });
    let mut response = Response::new(Body::from_stream(failure));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
