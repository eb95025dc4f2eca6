//! Management listener.
//!
//! # Data Flow
//! ```text
//! {metrics_prefix}...     → MetricsExporter::scrape (drain + history) → text
//! {controllers_prefix}... → ControllerBody::parse → ControllerDispatcher
//!                         → ControllerResponse::into_http
//! anything else           → 404
//! ```
//!
//! Prefixes are fixed when the listener is built. An absent prefix disables
//! that route; an absent exporter turns the metrics route into a 404.

pub mod controller;
pub mod handlers;
pub mod shorturl;

use std::io;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::observability::MetricsExporter;

use self::controller::ControllerDispatcher;

pub use controller::{ControllerBody, ControllerError, ControllerRequest, ControllerResponse};
pub use shorturl::ShortUrlController;

/// State shared by the management routes.
#[derive(Clone, Default)]
pub struct ManagementState {
    pub metrics: Option<Arc<MetricsExporter>>,
    pub metrics_prefix: Option<String>,
    pub controllers: Option<Arc<dyn ControllerDispatcher>>,
    pub controllers_prefix: Option<String>,
}

pub fn setup_management_router(state: ManagementState) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .with_state(state)
}

/// HTTP server for the management listener.
pub struct ManagementServer {
    router: Router,
}

impl ManagementServer {
    pub fn new(state: ManagementState) -> Self {
        Self {
            router: setup_management_router(state),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Management listener starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Management listener stopped");
        Ok(())
    }
}
