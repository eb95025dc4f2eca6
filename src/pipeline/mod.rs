//! Checkpoint pipeline.
//!
//! # Data Flow
//! ```text
//! Received
//!     → RouteResolved   (RouteResolver, mandatory)
//!     → Authenticated   (Authenticator, optional)
//!     → QuotaChecked    (QuotaChecker, optional, needs a principal)
//!     → Transformed     (Transformer, optional)
//!     → Forwarded       (ForwardTransport)
//!     → Completed
//!
//! Any checkpoint → Failed(stage): remaining stages skipped, mapped
//! response (404 / 401 / 403 / 500) sent immediately.
//! ```
//!
//! # Design Decisions
//! - Every capability call is bounded by the checkpoint timeout; a timeout
//!   is that checkpoint's failure
//! - The upstream call is bounded by the forward timeout; a timeout is a
//!   transport failure
//! - Exactly one of {forwarded, rejected} happens per request
//! - Transport errors are not mapped to a status; they surface as
//!   `ForwardError` and the connection is dropped
//! - Committed side effects (e.g. a spent quota token) are never undone

pub mod context;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response};

use crate::checkpoint::{
    Authenticator, CapabilityError, Checkpoint, CheckpointError, QuotaChecker, RouteResolver,
    Transformer,
};
use crate::http::transport::{ForwardError, ForwardTransport};
use crate::observability::{GatewayEvent, ObservabilityBus, Outcome};

use self::context::{RequestContext, RouteTarget, Stage};

/// Orchestrates the checkpoints for every request.
pub struct Pipeline {
    resolver: Arc<dyn RouteResolver>,
    authenticator: Option<Arc<dyn Authenticator>>,
    quota: Option<Arc<dyn QuotaChecker>>,
    transformer: Option<Arc<dyn Transformer>>,
    transport: Arc<dyn ForwardTransport>,
    bus: Arc<ObservabilityBus>,
    checkpoint_timeout: Duration,
    forward_timeout: Duration,
}

/// Checkpoints that can call a capability: route, auth, quota, transform.
const BOUNDED_CHECKPOINTS: u32 = 4;

/// Builder for [`Pipeline`]. Only the resolver and transport are required.
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn authenticator(mut self, auth: Option<Arc<dyn Authenticator>>) -> Self {
        self.pipeline.authenticator = auth;
        self
    }

    pub fn quota(mut self, quota: Option<Arc<dyn QuotaChecker>>) -> Self {
        self.pipeline.quota = quota;
        self
    }

    pub fn transformer(mut self, transformer: Option<Arc<dyn Transformer>>) -> Self {
        self.pipeline.transformer = transformer;
        self
    }

    pub fn bus(mut self, bus: Arc<ObservabilityBus>) -> Self {
        self.pipeline.bus = bus;
        self
    }

    pub fn checkpoint_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.checkpoint_timeout = timeout;
        self
    }

    /// Bound on the upstream response head.
    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.forward_timeout = timeout;
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

impl Pipeline {
    pub fn builder(
        resolver: Arc<dyn RouteResolver>,
        transport: Arc<dyn ForwardTransport>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            pipeline: Pipeline {
                resolver,
                authenticator: None,
                quota: None,
                transformer: None,
                transport,
                bus: Arc::new(ObservabilityBus::new()),
                checkpoint_timeout: Duration::from_secs(5),
                forward_timeout: Duration::from_secs(30),
            },
        }
    }

    /// Longest `handle` can take before it resolves on its own.
    pub fn deadline(&self) -> Duration {
        self.checkpoint_timeout * BOUNDED_CHECKPOINTS + self.forward_timeout
    }

    /// Run one request through every checkpoint and forward it.
    ///
    /// Checkpoint failures come back as `Ok` with the mapped status. `Err`
    /// means the request was forwarded and the transport failed; the caller
    /// must drop the connection.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext::accept(parts.method, parts.uri, parts.headers);

        self.bus.emit(&GatewayEvent::RecvReq {
            request_id: ctx.id().to_string(),
            method: ctx.method.to_string(),
            path: ctx.uri.path().to_string(),
            received_at: ctx.received_at(),
        });

        let mut response_headers = HeaderMap::new();
        let target = match self.run_checkpoints(&mut ctx, &mut response_headers).await {
            Ok(target) => target,
            Err(err) => {
                ctx.fail(err.checkpoint());
                return Ok(reject(&err, response_headers));
            }
        };

        self.forward(ctx, body, target, response_headers).await
    }

    async fn run_checkpoints(
        &self,
        ctx: &mut RequestContext,
        response_headers: &mut HeaderMap,
    ) -> Result<RouteTarget, CheckpointError> {
        // Route
        let resolved = {
            let view: &RequestContext = ctx;
            self.bounded(view, Checkpoint::Route, async move {
                Ok::<_, CapabilityError>(self.resolver.resolve(view).await)
            })
            .await?
        };
        let Some(mut target) = resolved else {
            return Err(self.failed(ctx, CheckpointError::RouteNotFound));
        };
        ctx.set_target(target.clone());
        self.passed(ctx, Checkpoint::Route);
        ctx.advance(Stage::RouteResolved);

        // Auth
        if let Some(auth) = &self.authenticator {
            let principal = self
                .bounded(ctx, Checkpoint::Auth, auth.check(ctx, response_headers))
                .await?;
            ctx.set_principal(principal);
            self.passed(ctx, Checkpoint::Auth);
        }
        ctx.advance(Stage::Authenticated);

        // Quota
        if let (Some(quota), Some(_)) = (&self.quota, ctx.principal()) {
            self.bounded(ctx, Checkpoint::Quota, quota.check(ctx)).await?;
            self.passed(ctx, Checkpoint::Quota);
        }
        ctx.advance(Stage::QuotaChecked);

        // Transform
        if let Some(transformer) = &self.transformer {
            let result = self
                .bounded(
                    ctx,
                    Checkpoint::Transform,
                    transformer.check(ctx.principal(), ctx, &target),
                )
                .await?;
            if let Some(replacement) = result.target {
                tracing::debug!(request_id = %ctx.id(), from = %target, to = %replacement, "Target replaced");
                target = replacement;
                ctx.set_target(target.clone());
            }
            self.passed(ctx, Checkpoint::Transform);
        }
        ctx.advance(Stage::Transformed);

        Ok(target)
    }

    /// Await a capability call under the checkpoint timeout.
    ///
    /// Any failure is published before it is returned.
    async fn bounded<T, F>(
        &self,
        ctx: &RequestContext,
        stage: Checkpoint,
        call: F,
    ) -> Result<T, CheckpointError>
    where
        F: Future<Output = Result<T, CapabilityError>>,
    {
        match tokio::time::timeout(self.checkpoint_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.failed(ctx, CheckpointError::rejected(stage, e))),
            Err(_) => Err(self.failed(ctx, CheckpointError::Timeout(stage, self.checkpoint_timeout))),
        }
    }

    fn passed(&self, ctx: &RequestContext, stage: Checkpoint) {
        self.bus.emit(&GatewayEvent::CheckpointReq {
            request_id: ctx.id().to_string(),
            client: ctx.principal().map(str::to_string),
            stage,
            outcome: Outcome::Success,
        });
    }

    fn failed(&self, ctx: &RequestContext, err: CheckpointError) -> CheckpointError {
        self.bus.emit(&GatewayEvent::CheckpointReq {
            request_id: ctx.id().to_string(),
            client: ctx.principal().map(str::to_string),
            stage: err.checkpoint(),
            outcome: Outcome::Failure(err.to_string()),
        });
        err
    }

    async fn forward(
        &self,
        mut ctx: RequestContext,
        body: Body,
        target: RouteTarget,
        response_headers: HeaderMap,
    ) -> Result<Response<Body>, ForwardError> {
        let request_id = ctx.id().to_string();
        let client = ctx.principal().map(str::to_string);

        let mut upstream = Request::new(body);
        *upstream.method_mut() = ctx.method.clone();
        *upstream.uri_mut() = ctx.uri.clone();
        *upstream.headers_mut() = std::mem::take(&mut ctx.headers);

        self.bus.emit(&GatewayEvent::ProxyReq {
            request_id: request_id.clone(),
            client: client.clone(),
            target: target.to_string(),
        });
        ctx.advance(Stage::Forwarded);

        let sent = tokio::time::timeout(self.forward_timeout, self.transport.forward(upstream, &target))
            .await
            .unwrap_or_else(|_| {
                Err(ForwardError::Upstream(format!(
                    "no response from {target} within {:?}",
                    self.forward_timeout
                )))
            });

        match sent {
            Ok(mut response) => {
                self.bus.emit(&GatewayEvent::ProxyRes {
                    request_id,
                    client,
                    status: response.status().as_u16(),
                });
                ctx.advance(Stage::Completed);
                for (name, value) in response_headers.iter() {
                    response.headers_mut().append(name.clone(), value.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if let ForwardError::InvalidRequest(message) = &err {
                    self.bus.emit(&GatewayEvent::Error {
                        request_id: Some(request_id.clone()),
                        message: message.clone(),
                    });
                }
                self.bus.emit(&GatewayEvent::CheckpointReq {
                    request_id,
                    client,
                    stage: Checkpoint::Forward,
                    outcome: Outcome::Failure(err.to_string()),
                });
                ctx.fail(Checkpoint::Forward);
                Err(err)
            }
        }
    }
}

/// Plain-text rejection for a checkpoint failure.
fn reject(err: &CheckpointError, headers: HeaderMap) -> Response<Body> {
    let mut response = Response::new(Body::from(err.to_string()));
    *response.status_mut() = err.status();
    *response.headers_mut() = headers;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
