//! Traffic counters and their exposition.
//!
//! # Responsibilities
//! - Count received / forwarded / failed / succeeded requests, overall and
//!   per client
//! - Drain the counters on every scrape and fold the deltas into a
//!   Prometheus exposition
//!
//! # Metrics
//! - `{prefix}_access_total{status, client}` (counter). `client="all"` rows
//!   carry statuses `all`, `sendAll`, `sendFail`, `sendSuccess`; per-client
//!   rows carry the three `send*` statuses.
//! - `{prefix}_history_total{status}` (counter), when history is enabled.
//!
//! # Design Decisions
//! - Every mutation is one critical section under a single mutex; nothing
//!   awaits while holding it
//! - `drain` swaps the whole counter set in that same critical section, so an
//!   increment lands either before the swap (returned) or after it (kept for
//!   the next scrape)
//! - Drained client rows are kept at zero so label sets stay stable
//! - The Prometheus recorder is owned by the exporter instance and never
//!   installed globally

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::observability::history::SingleFlightTotals;

/// Client label of the aggregate rows.
pub const ALL_CLIENTS: &str = "all";

/// Counted request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessStatus {
    /// Request accepted by the proxy listener.
    Received,
    /// Request handed to the forwarding transport.
    Forwarded,
    /// Forward failed at transport level or upstream answered >= 500.
    Failed,
    /// Upstream answered < 500.
    Succeeded,
}

impl AccessStatus {
    pub const ALL: [AccessStatus; 4] = [
        AccessStatus::Received,
        AccessStatus::Forwarded,
        AccessStatus::Failed,
        AccessStatus::Succeeded,
    ];

    /// Statuses tracked per client.
    pub const PER_CLIENT: [AccessStatus; 3] = [
        AccessStatus::Forwarded,
        AccessStatus::Failed,
        AccessStatus::Succeeded,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AccessStatus::Received => "all",
            AccessStatus::Forwarded => "sendAll",
            AccessStatus::Failed => "sendFail",
            AccessStatus::Succeeded => "sendSuccess",
        }
    }
}

/// Counts drained by one scrape, keyed by (client, status).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    counts: BTreeMap<(String, AccessStatus), u64>,
}

impl MetricsSnapshot {
    pub fn get(&self, client: &str, status: AccessStatus) -> u64 {
        self.counts
            .get(&(client.to_string(), status))
            .copied()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AccessStatus, u64)> {
        self.counts
            .iter()
            .map(|((client, status), count)| (client.as_str(), *status, *count))
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn zeroed(&self) -> Self {
        Self {
            counts: self.counts.keys().map(|k| (k.clone(), 0)).collect(),
        }
    }
}

/// Live traffic counters.
#[derive(Debug)]
pub struct MetricsAggregator {
    live: Mutex<MetricsSnapshot>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        let mut seed = MetricsSnapshot::default();
        for status in AccessStatus::ALL {
            seed.counts.insert((ALL_CLIENTS.to_string(), status), 0);
        }
        Self {
            live: Mutex::new(seed),
        }
    }

    /// Add one to a single (client, status) key.
    pub fn increment(&self, client: &str, status: AccessStatus) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live.counts.entry((client.to_string(), status)).or_insert(0) += 1;
    }

    /// Count one request outcome on the aggregate row and, when the client is
    /// known and the status is tracked per client, on the client row too.
    pub fn record(&self, client: Option<&str>, status: AccessStatus) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live
            .counts
            .entry((ALL_CLIENTS.to_string(), status))
            .or_insert(0) += 1;
        if let Some(client) = client.filter(|c| *c != ALL_CLIENTS) {
            if AccessStatus::PER_CLIENT.contains(&status) {
                for tracked in AccessStatus::PER_CLIENT {
                    let slot = live.counts.entry((client.to_string(), tracked)).or_insert(0);
                    if tracked == status {
                        *slot += 1;
                    }
                }
            }
        }
    }

    /// Swap the live counters for a zeroed set and return the old one.
    pub fn drain(&self) -> MetricsSnapshot {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = live.zeroed();
        std::mem::replace(&mut *live, fresh)
    }
}

/// Renders the aggregator in Prometheus text format.
pub struct MetricsExporter {
    aggregator: Arc<MetricsAggregator>,
    history: Option<Arc<SingleFlightTotals>>,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    access_name: String,
    history_name: String,
}

impl MetricsExporter {
    pub fn new(
        prefix: &str,
        aggregator: Arc<MetricsAggregator>,
        history: Option<Arc<SingleFlightTotals>>,
    ) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            aggregator,
            history,
            recorder,
            handle,
            access_name: format!("{prefix}_access_total"),
            history_name: format!("{prefix}_history_total"),
        }
    }

    /// Drain the aggregator, fold the deltas in and render.
    pub async fn scrape(&self) -> String {
        let snapshot = self.aggregator.drain();
        metrics::with_local_recorder(&self.recorder, || {
            for (client, status, count) in snapshot.iter() {
                metrics::counter!(
                    self.access_name.clone(),
                    "status" => status.label(),
                    "client" => client.to_string()
                )
                .increment(count);
            }
        });

        if let Some(history) = &self.history {
            match history.fetch_totals().await {
                Ok(window) => {
                    metrics::with_local_recorder(&self.recorder, || {
                        for total in &window.totals {
                            metrics::counter!(
                                self.history_name.clone(),
                                "status" => total.status.clone()
                            )
                            .increment(total.total);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Historical totals unavailable for this scrape");
                }
            }
        }

        tracing::debug!(drained = snapshot.total(), "Metrics scraped");
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::GatewayEvent;
    use crate::observability::history::{EventLog, HistoryError, HistorySource, HistoryWindow, Watermark};
    use crate::observability::Subscriber;
    use async_trait::async_trait;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    for _ in 0..1_000 {
                        aggregator.increment("alice", AccessStatus::Forwarded);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let first = aggregator.drain();
        assert_eq!(first.get("alice", AccessStatus::Forwarded), 8_000);

        let second = aggregator.drain();
        assert_eq!(second.get("alice", AccessStatus::Forwarded), 0);
    }

    #[test]
    fn test_drains_are_independent() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..3 {
            aggregator.record(Some("bob"), AccessStatus::Forwarded);
        }
        let d1 = aggregator.drain();

        for _ in 0..5 {
            aggregator.record(Some("bob"), AccessStatus::Forwarded);
        }
        let d2 = aggregator.drain();

        assert_eq!(d1.get("bob", AccessStatus::Forwarded), 3);
        assert_eq!(d2.get("bob", AccessStatus::Forwarded), 5);
        assert_eq!(d2.get(ALL_CLIENTS, AccessStatus::Forwarded), 5);
    }

    #[test]
    fn test_drain_keeps_labels_at_zero() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(Some("carol"), AccessStatus::Succeeded);
        aggregator.record(None, AccessStatus::Received);

        let first = aggregator.drain();
        assert_eq!(first.get("carol", AccessStatus::Succeeded), 1);
        assert_eq!(first.get(ALL_CLIENTS, AccessStatus::Received), 1);

        let second = aggregator.drain();
        assert_eq!(second.len(), first.len());
        assert_eq!(second.total(), 0);
        assert!(second
            .iter()
            .any(|(client, status, _)| client == "carol" && status == AccessStatus::Failed));
    }

    #[test]
    fn test_received_is_not_tracked_per_client() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(Some("dave"), AccessStatus::Received);
        let snapshot = aggregator.drain();
        assert_eq!(snapshot.get(ALL_CLIENTS, AccessStatus::Received), 1);
        assert!(snapshot.iter().all(|(client, _, _)| client != "dave"));
    }

    fn line_for<'a>(text: &'a str, needles: &[&str]) -> Option<&'a str> {
        text.lines()
            .filter(|l| !l.starts_with('#'))
            .find(|l| needles.iter().all(|n| l.contains(n)))
    }

    #[tokio::test]
    async fn test_exposition_accumulates_deltas() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let exporter = MetricsExporter::new("gw", aggregator.clone(), None);

        aggregator.record(Some("alice"), AccessStatus::Forwarded);
        aggregator.record(Some("alice"), AccessStatus::Forwarded);
        let text = exporter.scrape().await;
        let line = line_for(&text, &["gw_access_total", "client=\"alice\"", "status=\"sendAll\""])
            .expect("alice row rendered");
        assert!(line.ends_with(" 2"), "unexpected line: {line}");

        aggregator.record(Some("alice"), AccessStatus::Forwarded);
        let text = exporter.scrape().await;
        let line = line_for(&text, &["gw_access_total", "client=\"alice\"", "status=\"sendAll\""])
            .expect("alice row rendered");
        assert!(line.ends_with(" 3"), "unexpected line: {line}");

        let idle = line_for(&text, &["client=\"alice\"", "status=\"sendFail\""])
            .expect("zero rows stay rendered");
        assert!(idle.ends_with(" 0"));
    }

    #[tokio::test]
    async fn test_exporters_do_not_share_state() {
        let a = Arc::new(MetricsAggregator::new());
        let b = Arc::new(MetricsAggregator::new());
        let ea = MetricsExporter::new("gw", a.clone(), None);
        let eb = MetricsExporter::new("gw", b.clone(), None);

        a.record(Some("only-a"), AccessStatus::Forwarded);
        let ta = ea.scrape().await;
        let tb = eb.scrape().await;
        assert!(ta.contains("only-a"));
        assert!(!tb.contains("only-a"));
    }

    fn proxy_res(status: u16) -> GatewayEvent {
        GatewayEvent::ProxyRes {
            request_id: "r".into(),
            client: Some("alice".into()),
            status,
        }
    }

    #[tokio::test]
    async fn test_history_totals_accumulate_across_scrapes() {
        let log = Arc::new(EventLog::new());
        let history = Arc::new(SingleFlightTotals::new(log.clone(), log.head()));
        let exporter = MetricsExporter::new("gw", Arc::new(MetricsAggregator::new()), Some(history.clone()));

        log.on_event(&proxy_res(200)).unwrap();
        log.on_event(&proxy_res(503)).unwrap();
        let text = exporter.scrape().await;
        let all = line_for(&text, &["gw_history_total", "status=\"all\""]).expect("all row rendered");
        assert!(all.ends_with(" 2"), "unexpected line: {all}");
        let fail = line_for(&text, &["gw_history_total", "status=\"fail\""]).expect("fail row rendered");
        assert!(fail.ends_with(" 1"), "unexpected line: {fail}");

        log.on_event(&proxy_res(200)).unwrap();
        let text = exporter.scrape().await;
        let all = line_for(&text, &["gw_history_total", "status=\"all\""]).expect("all row rendered");
        assert!(all.ends_with(" 3"), "unexpected line: {all}");
        let fail = line_for(&text, &["gw_history_total", "status=\"fail\""]).expect("fail row rendered");
        assert!(fail.ends_with(" 1"), "unexpected line: {fail}");
        assert_eq!(history.running_totals().get("all"), Some(&3));
    }

    struct BrokenSource;

    #[async_trait]
    impl HistorySource for BrokenSource {
        fn head(&self) -> Watermark {
            0
        }

        async fn totals_since(&self, _since: Watermark) -> Result<HistoryWindow, HistoryError> {
            Err(HistoryError::Source("log unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_history_failure_still_renders_access_counters() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let history = Arc::new(SingleFlightTotals::new(Arc::new(BrokenSource), 0));
        let exporter = MetricsExporter::new("gw", aggregator.clone(), Some(history.clone()));

        aggregator.record(Some("alice"), AccessStatus::Forwarded);
        let text = exporter.scrape().await;
        let line = line_for(&text, &["gw_access_total", "client=\"alice\"", "status=\"sendAll\""])
            .expect("alice row rendered");
        assert!(line.ends_with(" 1"), "unexpected line: {line}");
        assert!(!text.contains("gw_history_total"));
        assert_eq!(history.watermark(), 0);
    }
}
