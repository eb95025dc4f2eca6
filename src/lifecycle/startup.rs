//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the gateway context once: bus, aggregator, capabilities, pipeline
//! - Bind the proxy and management listeners
//! - Serve both until shutdown
//! - Report startup failures from a fallback server
//!
//! # Design Decisions
//! - Fail fast: any construction or bind error is a `StartupError`
//! - Subscribers are registered before the bus is shared
//! - Listeners bind last, so traffic only arrives once the context is ready

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::admin::{ManagementServer, ManagementState, ShortUrlController};
use crate::checkpoint::{
    build_authenticator, ClientTargetTransformer, QuotaChecker, TokenBucketQuota, Transformer,
};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, GatewayConfig};
use crate::http::{HttpServer, HyperTransport};
use crate::lifecycle::Shutdown;
use crate::observability::{
    EventLog, HistorySource, LogSubscriber, MetricsAggregator, MetricsExporter, MetricsSubscriber,
    ObservabilityBus, SingleFlightTotals,
};
use crate::pipeline::context::InvalidTarget;
use crate::pipeline::Pipeline;
use crate::routing::{ChainResolver, RouteTable, ShortUrlResolver, ShortUrlStore};

/// Failure to bring the gateway up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid target: {0}")]
    Target(#[from] InvalidTarget),

    #[error("failed to build auth client: {0}")]
    Auth(#[from] reqwest::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),
}

/// Everything the listeners share, built once from the configuration.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub bus: Arc<ObservabilityBus>,
    pub aggregator: Arc<MetricsAggregator>,
    pub exporter: Option<Arc<MetricsExporter>>,
    pub history: Option<Arc<SingleFlightTotals>>,
    pub shorturls: ShortUrlStore,
    pub pipeline: Arc<Pipeline>,
}

impl GatewayContext {
    pub fn from_config(config: GatewayConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let checkpoint_timeout = Duration::from_millis(config.timeouts.checkpoint_ms);
        let aggregator = Arc::new(MetricsAggregator::new());

        let mut bus = ObservabilityBus::new();
        bus.subscribe(Arc::new(LogSubscriber));
        let mut history = None;
        if config.metrics.enabled {
            bus.subscribe(Arc::new(MetricsSubscriber::new(aggregator.clone())));
            if config.metrics.history_enabled {
                let log = Arc::new(EventLog::with_capacity(config.metrics.history_capacity));
                bus.subscribe(log.clone());
                let start = log.head();
                history = Some(Arc::new(SingleFlightTotals::new(log, start)));
            }
        }
        let bus = Arc::new(bus);

        let exporter = config.metrics.enabled.then(|| {
            Arc::new(MetricsExporter::new(
                &config.metrics.prefix,
                aggregator.clone(),
                history.clone(),
            ))
        });

        let shorturls = ShortUrlStore::new();
        let routes = RouteTable::from_config(config.routes.clone())?;
        tracing::info!(routes = routes.len(), "Route table compiled");
        let resolver = ChainResolver::new()
            .with(Arc::new(ShortUrlResolver::new(
                config.shorturl.prefix.clone(),
                shorturls.clone(),
            )))
            .with(Arc::new(routes));

        let authenticator = build_authenticator(config.auth.as_ref(), checkpoint_timeout)?;
        let quota = config
            .quota
            .as_ref()
            .map(|q| Arc::new(TokenBucketQuota::new(q)) as Arc<dyn QuotaChecker>);
        let transformer = match &config.transform {
            Some(t) => Some(Arc::new(ClientTargetTransformer::new(t)?) as Arc<dyn Transformer>),
            None => None,
        };

        let pipeline = Pipeline::builder(Arc::new(resolver), Arc::new(HyperTransport::new()))
            .authenticator(authenticator)
            .quota(quota)
            .transformer(transformer)
            .bus(bus.clone())
            .checkpoint_timeout(checkpoint_timeout)
            .forward_timeout(Duration::from_secs(config.timeouts.request_secs))
            .build();

        Ok(Self {
            config,
            bus,
            aggregator,
            exporter,
            history,
            shorturls,
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn management_state(&self) -> ManagementState {
        ManagementState {
            metrics: self.exporter.clone(),
            metrics_prefix: self.config.management.metrics_prefix.clone(),
            controllers: Some(Arc::new(ShortUrlController::new(
                &self.config.shorturl,
                self.shorturls.clone(),
            ))),
            controllers_prefix: self.config.management.controllers_prefix.clone(),
        }
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

/// A built context with its listeners bound, not yet serving.
pub struct Gateway {
    context: GatewayContext,
    proxy: TcpListener,
    management: Option<TcpListener>,
}

impl Gateway {
    pub async fn bind(config: GatewayConfig) -> Result<Self, StartupError> {
        let context = GatewayContext::from_config(config)?;
        let proxy = bind(&context.config.listener.bind_address).await?;
        let management = if context.config.management.enabled {
            Some(bind(&context.config.management.bind_address).await?)
        } else {
            None
        };
        Ok(Self {
            context,
            proxy,
            management,
        })
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    pub fn proxy_addr(&self) -> io::Result<SocketAddr> {
        self.proxy.local_addr()
    }

    pub fn management_addr(&self) -> Option<SocketAddr> {
        self.management.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serve both listeners until `shutdown` fires.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let proxy = HttpServer::new(self.context.pipeline.clone())
            .run(self.proxy, shutdown.subscribe());

        match self.management {
            Some(listener) => {
                let management = ManagementServer::new(self.context.management_state())
                    .run(listener, shutdown.subscribe());
                tokio::try_join!(proxy, management).map_err(StartupError::Serve)?;
            }
            None => proxy.await.map_err(StartupError::Serve)?,
        }
        Ok(())
    }
}

/// Build, bind and serve the gateway.
pub async fn run(config: GatewayConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let gateway = Gateway::bind(config).await?;
    tracing::info!(
        proxy = ?gateway.proxy_addr().ok(),
        management = ?gateway.management_addr(),
        "Gateway ready"
    );
    gateway.serve(shutdown).await
}

/// Router answering every request with the startup error.
pub fn fallback_router(error: &StartupError) -> Router {
    let message = error.to_string();
    Router::new().fallback(move || {
        let message = message.clone();
        async move { (StatusCode::INTERNAL_SERVER_ERROR, message) }
    })
}

/// Report `error` on every request until shutdown.
pub async fn serve_fallback(
    listener: TcpListener,
    error: &StartupError,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::warn!(address = %addr, error = %error, "Serving startup error from fallback server");

    axum::serve(listener, fallback_router(error))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
