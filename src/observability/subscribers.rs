//! Built-in bus subscribers.

use std::sync::Arc;

use crate::checkpoint::Checkpoint;
use crate::observability::bus::{Subscriber, SubscriberError};
use crate::observability::events::{GatewayEvent, Outcome};
use crate::observability::metrics::{AccessStatus, MetricsAggregator};

/// Structured log line per lifecycle event.
#[derive(Debug, Default)]
pub struct LogSubscriber;

impl Subscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&self, event: &GatewayEvent) -> Result<(), SubscriberError> {
        match event {
            GatewayEvent::RecvReq {
                request_id,
                method,
                path,
                received_at,
            } => {
                tracing::debug!(request_id = %request_id, method = %method, path = %path, received_at, "recvReq");
            }
            GatewayEvent::ProxyReq {
                request_id,
                client,
                target,
            } => {
                tracing::debug!(request_id = %request_id, client = ?client, target = %target, "proxyReq");
            }
            GatewayEvent::ProxyRes {
                request_id,
                client,
                status,
            } => {
                tracing::debug!(request_id = %request_id, client = ?client, status, "proxyRes");
            }
            GatewayEvent::CheckpointReq {
                request_id,
                client,
                stage,
                outcome: Outcome::Success,
            } => {
                tracing::debug!(request_id = %request_id, client = ?client, stage = %stage, "checkpoint passed");
            }
            GatewayEvent::CheckpointReq {
                request_id,
                client,
                stage,
                outcome: Outcome::Failure(reason),
            } => {
                tracing::warn!(request_id = %request_id, client = ?client, stage = %stage, reason = %reason, "checkpoint failed");
            }
            GatewayEvent::Error {
                request_id,
                message,
            } => {
                tracing::error!(request_id = ?request_id, message = %message, "gateway error");
            }
        }
        Ok(())
    }
}

/// Feeds the [`MetricsAggregator`] from lifecycle events.
pub struct MetricsSubscriber {
    aggregator: Arc<MetricsAggregator>,
}

impl MetricsSubscriber {
    pub fn new(aggregator: Arc<MetricsAggregator>) -> Self {
        Self { aggregator }
    }
}

impl Subscriber for MetricsSubscriber {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &GatewayEvent) -> Result<(), SubscriberError> {
        match event {
            GatewayEvent::RecvReq { .. } => {
                self.aggregator.record(None, AccessStatus::Received);
            }
            GatewayEvent::ProxyReq { client, .. } => {
                self.aggregator.record(client.as_deref(), AccessStatus::Forwarded);
            }
            GatewayEvent::ProxyRes { client, status, .. } => {
                let status = if *status >= 500 {
                    AccessStatus::Failed
                } else {
                    AccessStatus::Succeeded
                };
                self.aggregator.record(client.as_deref(), status);
            }
            GatewayEvent::CheckpointReq {
                client,
                stage: Checkpoint::Forward,
                outcome: Outcome::Failure(_),
                ..
            } => {
                self.aggregator.record(client.as_deref(), AccessStatus::Failed);
            }
            _ => {}
        }
        Ok(())
    }
}
