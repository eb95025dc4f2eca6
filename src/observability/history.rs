//! Exact historical totals with single-flight de-duplication.
//!
//! # Responsibilities
//! - Replay a request log from a watermark to get exact totals
//! - Share one in-flight computation between all concurrent callers
//! - Advance the watermark and merge into running totals on success only
//!
//! # Design Decisions
//! - The pending computation is a per-instance `Shared` future stored next
//!   to the watermark it was started for
//! - Watermark, running totals and the pending handle live under one mutex
//!   that is never held across an await
//! - A failed computation clears the pending handle and leaves the watermark
//!   untouched, so the next call recomputes the same window

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use crate::checkpoint::Checkpoint;
use crate::observability::bus::{Subscriber, SubscriberError};
use crate::observability::events::{GatewayEvent, Outcome};

/// Opaque, monotonically increasing log position.
pub type Watermark = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history source failed: {0}")]
    Source(String),
}

/// Total for one status label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTotal {
    pub status: String,
    pub total: u64,
}

/// Totals over `(since, until]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWindow {
    pub since: Watermark,
    pub until: Watermark,
    pub totals: Vec<StatusTotal>,
}

/// A replayable record of completed requests.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Current head of the log.
    fn head(&self) -> Watermark;

    /// Count everything after `since`, reporting the position counted up to.
    async fn totals_since(&self, since: Watermark) -> Result<HistoryWindow, HistoryError>;
}

type Flight = Shared<BoxFuture<'static, Result<Arc<HistoryWindow>, HistoryError>>>;

#[derive(Default)]
struct FlightState {
    watermark: Watermark,
    running: BTreeMap<String, u64>,
    pending: Option<(Watermark, Flight)>,
}

/// Single-flight front for a [`HistorySource`].
pub struct SingleFlightTotals {
    source: Arc<dyn HistorySource>,
    state: Arc<Mutex<FlightState>>,
}

impl SingleFlightTotals {
    pub fn new(source: Arc<dyn HistorySource>, start: Watermark) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(FlightState {
                watermark: start,
                ..FlightState::default()
            })),
        }
    }

    pub fn watermark(&self) -> Watermark {
        lock(&self.state).watermark
    }

    /// Sum of every successful window so far.
    pub fn running_totals(&self) -> BTreeMap<String, u64> {
        lock(&self.state).running.clone()
    }

    /// Totals since the current watermark.
    ///
    /// Joins the pending computation for that watermark if there is one.
    pub async fn fetch_totals(&self) -> Result<Arc<HistoryWindow>, HistoryError> {
        let flight = {
            let mut state = lock(&self.state);
            let since = state.watermark;
            match &state.pending {
                Some((at, flight)) if *at == since => flight.clone(),
                _ => {
                    let flight = self.start(since);
                    state.pending = Some((since, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    fn start(&self, since: Watermark) -> Flight {
        let source = self.source.clone();
        let state = self.state.clone();
        async move {
            let result = source.totals_since(since).await;
            let mut state = lock(&state);
            match result {
                Ok(window) => {
                    state.watermark = window.until.max(since);
                    for total in &window.totals {
                        *state.running.entry(total.status.clone()).or_insert(0) += total.total;
                    }
                    tracing::debug!(since, until = state.watermark, "Historical totals merged");
                    Ok(Arc::new(window))
                }
                Err(e) => {
                    if matches!(&state.pending, Some((at, _)) if *at == since) {
                        state.pending = None;
                    }
                    tracing::warn!(since, error = %e, "Historical totals computation failed");
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entries an [`EventLog`] keeps when no capacity is given.
pub const DEFAULT_LOG_CAPACITY: usize = 100_000;

/// In-process request log fed from the bus.
///
/// Records one entry per finished forward: success on `proxyRes < 500`,
/// failure on `proxyRes >= 500` or a forward checkpoint failure.
///
/// Entries are only pruned by a replay. Without one the log holds at most
/// `capacity` entries and drops the oldest, which then never reach a total.
pub struct EventLog {
    next: AtomicU64,
    capacity: usize,
    entries: Mutex<VecDeque<(Watermark, bool)>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next: AtomicU64::new(0),
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn append(&self, failed: bool) {
        let mut entries = lock(&self.entries);
        let position = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        if entries.len() >= self.capacity {
            if let Some((dropped, _)) = entries.pop_front() {
                tracing::warn!(
                    position = dropped,
                    capacity = self.capacity,
                    "Event log full, oldest entry dropped"
                );
            }
        }
        entries.push_back((position, failed));
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl Subscriber for EventLog {
    fn name(&self) -> &str {
        "event-log"
    }

    fn on_event(&self, event: &GatewayEvent) -> Result<(), SubscriberError> {
        match event {
            GatewayEvent::ProxyRes { status, .. } => self.append(*status >= 500),
            GatewayEvent::CheckpointReq {
                stage: Checkpoint::Forward,
                outcome: Outcome::Failure(_),
                ..
            } => self.append(true),
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl HistorySource for EventLog {
    fn head(&self) -> Watermark {
        let _entries = lock(&self.entries);
        self.next.load(Ordering::SeqCst)
    }

    async fn totals_since(&self, since: Watermark) -> Result<HistoryWindow, HistoryError> {
        let mut entries = lock(&self.entries);
        // Everything at or before the watermark has already been merged.
        while entries.front().is_some_and(|(at, _)| *at <= since) {
            entries.pop_front();
        }

        let until = self.next.load(Ordering::SeqCst).max(since);
        let all = entries.len() as u64;
        let fail = entries.iter().filter(|(_, failed)| *failed).count() as u64;

        Ok(HistoryWindow {
            since,
            until,
            totals: vec![
                StatusTotal {
                    status: "all".to_string(),
                    total: all,
                },
                StatusTotal {
                    status: "fail".to_string(),
                    total: fail,
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowSource {
        calls: AtomicUsize,
        seen: Mutex<Vec<Watermark>>,
        fail_first: bool,
        label: &'static str,
    }

    impl SlowSource {
        fn new(label: &'static str, fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                fail_first,
                label,
            })
        }
    }

    #[async_trait]
    impl HistorySource for SlowSource {
        fn head(&self) -> Watermark {
            0
        }

        async fn totals_since(&self, since: Watermark) -> Result<HistoryWindow, HistoryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(since);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_first && call == 0 {
                return Err(HistoryError::Source("database down".into()));
            }
            Ok(HistoryWindow {
                since,
                until: since + 10,
                totals: vec![StatusTotal {
                    status: self.label.to_string(),
                    total: 7,
                }],
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let source = SlowSource::new("all", false);
        let totals = SingleFlightTotals::new(source.clone(), 0);

        let results = join_all((0..16).map(|_| totals.fetch_totals())).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(totals.watermark(), 10);
        assert_eq!(totals.running_totals().get("all"), Some(&7));
    }

    #[tokio::test]
    async fn test_sequential_calls_advance_the_window() {
        let source = SlowSource::new("all", false);
        let totals = SingleFlightTotals::new(source.clone(), 5);

        totals.fetch_totals().await.unwrap();
        totals.fetch_totals().await.unwrap();

        assert_eq!(*source.seen.lock().unwrap(), vec![5, 15]);
        assert_eq!(totals.running_totals().get("all"), Some(&14));
    }

    #[tokio::test]
    async fn test_failure_does_not_advance_watermark() {
        let source = SlowSource::new("all", true);
        let totals = SingleFlightTotals::new(source.clone(), 3);

        assert!(totals.fetch_totals().await.is_err());
        assert_eq!(totals.watermark(), 3);
        assert!(totals.running_totals().is_empty());

        totals.fetch_totals().await.unwrap();
        assert_eq!(*source.seen.lock().unwrap(), vec![3, 3]);
        assert_eq!(totals.watermark(), 13);
    }

    #[tokio::test]
    async fn test_instances_never_share_a_flight() {
        let source_a = SlowSource::new("a", false);
        let source_b = SlowSource::new("b", false);
        let a = SingleFlightTotals::new(source_a.clone(), 0);
        let b = SingleFlightTotals::new(source_b.clone(), 0);

        let (ra, rb) = tokio::join!(a.fetch_totals(), b.fetch_totals());

        assert_eq!(source_a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source_b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ra.unwrap().totals[0].status, "a");
        assert_eq!(rb.unwrap().totals[0].status, "b");
        assert!(a.running_totals().get("b").is_none());
    }

    fn proxy_res(status: u16) -> GatewayEvent {
        GatewayEvent::ProxyRes {
            request_id: "r".into(),
            client: None,
            status,
        }
    }

    #[tokio::test]
    async fn test_event_log_replays_since_watermark() {
        let log = Arc::new(EventLog::new());
        log.on_event(&proxy_res(200)).unwrap();
        let start = log.head();
        log.on_event(&proxy_res(200)).unwrap();
        log.on_event(&proxy_res(502)).unwrap();
        log.on_event(&GatewayEvent::CheckpointReq {
            request_id: "r".into(),
            client: None,
            stage: Checkpoint::Forward,
            outcome: Outcome::Failure("connection refused".into()),
        })
        .unwrap();

        let totals = SingleFlightTotals::new(log.clone(), start);
        let window = totals.fetch_totals().await.unwrap();
        assert_eq!(window.totals[0], StatusTotal { status: "all".into(), total: 3 });
        assert_eq!(window.totals[1], StatusTotal { status: "fail".into(), total: 2 });

        log.on_event(&proxy_res(204)).unwrap();
        let window = totals.fetch_totals().await.unwrap();
        assert_eq!(window.totals[0].total, 1);
        assert_eq!(window.totals[1].total, 0);
        assert_eq!(totals.running_totals().get("all"), Some(&4));
        // Merged entries are pruned on the next replay.
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let log = Arc::new(EventLog::with_capacity(2));
        for status in [200, 500, 200] {
            log.on_event(&proxy_res(status)).unwrap();
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.head(), 3);

        let window = log.totals_since(0).await.unwrap();
        assert_eq!(window.until, 3);
        assert_eq!(window.totals[0].total, 2);
        assert_eq!(window.totals[1].total, 1);
    }
}
