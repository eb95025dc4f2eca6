//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline (sole producer)
//!     → bus.rs (synchronous fan-out of GatewayEvent)
//!         → subscribers.rs LogSubscriber (structured log lines)
//!         → subscribers.rs MetricsSubscriber → metrics.rs MetricsAggregator
//!         → history.rs EventLog (replayable request log)
//!
//! Management scrape:
//!     → metrics.rs MetricsExporter (drain + Prometheus render)
//!     → history.rs SingleFlightTotals (exact totals since watermark)
//! ```
//!
//! # Design Decisions
//! - Closed set of typed events, no untyped broadcast
//! - Subscriber failures never reach the request path
//! - Request ID flows through every event

pub mod bus;
pub mod events;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod subscribers;

pub use self::bus::{ObservabilityBus, Subscriber, SubscriberError};
pub use self::events::{GatewayEvent, Outcome};
pub use self::history::{EventLog, HistorySource, HistoryWindow, SingleFlightTotals, StatusTotal, Watermark};
pub use self::metrics::{AccessStatus, MetricsAggregator, MetricsExporter, MetricsSnapshot};
pub use self::subscribers::{LogSubscriber, MetricsSubscriber};
