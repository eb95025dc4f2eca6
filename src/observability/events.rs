//! Request lifecycle events.

use crate::checkpoint::Checkpoint;

/// Result of one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Events published on the [`ObservabilityBus`](super::bus::ObservabilityBus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Request accepted and stamped.
    RecvReq {
        request_id: String,
        method: String,
        path: String,
        received_at: u64,
    },
    /// About to send upstream.
    ProxyReq {
        request_id: String,
        client: Option<String>,
        target: String,
    },
    /// Upstream response headers received.
    ProxyRes {
        request_id: String,
        client: Option<String>,
        status: u16,
    },
    /// A checkpoint finished.
    CheckpointReq {
        request_id: String,
        client: Option<String>,
        stage: Checkpoint,
        outcome: Outcome,
    },
    /// Failure outside any checkpoint.
    Error {
        request_id: Option<String>,
        message: String,
    },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::RecvReq { .. } => "recvReq",
            GatewayEvent::ProxyReq { .. } => "proxyReq",
            GatewayEvent::ProxyRes { .. } => "proxyRes",
            GatewayEvent::CheckpointReq { .. } => "checkpointReq",
            GatewayEvent::Error { .. } => "error",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            GatewayEvent::RecvReq { request_id, .. }
            | GatewayEvent::ProxyReq { request_id, .. }
            | GatewayEvent::ProxyRes { request_id, .. }
            | GatewayEvent::CheckpointReq { request_id, .. } => Some(request_id),
            GatewayEvent::Error { request_id, .. } => request_id.as_deref(),
        }
    }
}
