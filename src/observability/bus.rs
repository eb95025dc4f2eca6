//! Synchronous publish/subscribe for lifecycle events.
//!
//! # Responsibilities
//! - Fan every event out to all registered subscribers, in emission order
//! - Isolate subscriber failures from the request path
//!
//! # Design Decisions
//! - No buffering, no persistence: `emit` returns after every subscriber ran
//! - Subscribers are registered explicitly before the bus is shared
//! - A subscriber error or panic is logged and swallowed

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::observability::events::GatewayEvent;

/// Error returned by a subscriber. Never reaches the request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

/// A consumer of lifecycle events.
///
/// Runs on the emitting task; must not block.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &GatewayEvent) -> Result<(), SubscriberError>;
}

/// Typed event channel.
#[derive(Default, Clone)]
pub struct ObservabilityBus {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl ObservabilityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Registration order is delivery order.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        tracing::debug!(subscriber = %subscriber.name(), "Subscriber registered");
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every subscriber before returning.
    pub fn emit(&self, event: &GatewayEvent) {
        for subscriber in &self.subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        subscriber = %subscriber.name(),
                        event = event.kind(),
                        error = %e,
                        "Subscriber failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        subscriber = %subscriber.name(),
                        event = event.kind(),
                        "Subscriber panicked"
                    );
                }
            }
        }
    }
}
