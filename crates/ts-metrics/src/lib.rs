//! ts-metrics: the Metrics Collector (spec §4.1, component C1).
//!
//! A process-wide, concurrency-safe facility tracking per-feed message
//! rates, payload-size samples, context-ring stats, and LLM usage. All
//! updates are infallible and O(1) amortized; reads copy a consistent
//! per-feed snapshot, grounded in the teacher's `AppState` pattern
//! (`services/server/src/state.rs`) of a `DashMap`-backed registry with
//! one lock per entry, generalized here to per-feed metric state instead
//! of per-stream broadcast channels.

mod window;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ts_protocol::FeedId;
use window::{SampleBuffer, SlidingWindow};

const PAYLOAD_SAMPLE_CAP: usize = 1000;
const SAMPLE_TIME_BOX: Duration = Duration::from_secs(5 * 60);
const WINDOW_1S: Duration = Duration::from_secs(1);
const WINDOW_10S: Duration = Duration::from_secs(10);
const WINDOW_60S: Duration = Duration::from_secs(60);

struct FeedState {
    name: String,
    connected: bool,
    message_count_window: SlidingWindow,
    byte_count_window: SlidingWindow,
    payload_size_samples: SampleBuffer,
    messages_total: u64,
    bytes_total: u64,
    parse_failures_total: u64,
    backpressure_drops_total: u64,
    context_item_count: usize,
    context_approx_bytes: usize,
    context_oldest_age_secs: f64,
    llm_requests_total: u64,
    llm_errors_total: u64,
    llm_input_tokens_total: u64,
    llm_output_tokens_total: u64,
    ttft_ms_samples: SampleBuffer,
    total_gen_ms_samples: SampleBuffer,
    events_in_context_last: usize,
}

impl FeedState {
    fn new(name: String) -> Self {
        Self {
            name,
            connected: false,
            message_count_window: SlidingWindow::new(WINDOW_60S),
            byte_count_window: SlidingWindow::new(WINDOW_60S),
            payload_size_samples: SampleBuffer::new(PAYLOAD_SAMPLE_CAP, SAMPLE_TIME_BOX),
            messages_total: 0,
            bytes_total: 0,
            parse_failures_total: 0,
            backpressure_drops_total: 0,
            context_item_count: 0,
            context_approx_bytes: 0,
            context_oldest_age_secs: 0.0,
            llm_requests_total: 0,
            llm_errors_total: 0,
            llm_input_tokens_total: 0,
            llm_output_tokens_total: 0,
            ttft_ms_samples: SampleBuffer::new(PAYLOAD_SAMPLE_CAP, SAMPLE_TIME_BOX),
            total_gen_ms_samples: SampleBuffer::new(PAYLOAD_SAMPLE_CAP, SAMPLE_TIME_BOX),
            events_in_context_last: 0,
        }
    }
}

/// A consistent, immutable, per-feed copy of the collector's state at a
/// point in time, suitable for rendering (HTTP admin surface or the TUI).
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub feed_id: FeedId,
    pub name: String,
    pub connected: bool,
    pub messages_total: u64,
    pub bytes_total: u64,
    pub message_rate_1s: f64,
    pub message_rate_10s: f64,
    pub message_rate_60s: f64,
    pub byte_rate_1s: f64,
    pub payload_size_p50: Option<u64>,
    pub payload_size_p95: Option<u64>,
    pub payload_size_p99: Option<u64>,
    pub parse_failures_total: u64,
    pub backpressure_drops_total: u64,
    pub context_item_count: usize,
    pub context_approx_bytes: usize,
    pub context_oldest_age_secs: f64,
    pub llm_requests_total: u64,
    pub llm_errors_total: u64,
    pub llm_input_tokens_total: u64,
    pub llm_output_tokens_total: u64,
    pub ttft_ms_p50: Option<u64>,
    pub ttft_ms_p95: Option<u64>,
    pub total_gen_ms_avg: Option<f64>,
    pub events_in_context_last: usize,
}

/// A consistent snapshot of every feed known to the collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub feeds: Vec<FeedSnapshot>,
}

/// Process-wide metrics facility (spec §4.1). Cheaply cloneable; internally
/// an `Arc`-free `DashMap` of per-feed mutexes, so a single instance should
/// be constructed at process start and shared (spec §5: "No global mutable
/// state other than the singleton ... Metrics Collector").
#[derive(Default)]
pub struct MetricsCollector {
    feeds: DashMap<FeedId, Mutex<FeedState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: creates the feed's state if absent, otherwise a no-op.
    pub fn init_feed(&self, feed_id: &FeedId, name: &str) {
        self.feeds
            .entry(feed_id.clone())
            .or_insert_with(|| Mutex::new(FeedState::new(name.to_owned())));
    }

    fn with_feed<R>(&self, feed_id: &FeedId, f: impl FnOnce(&mut FeedState) -> R) -> R {
        let entry = self
            .feeds
            .entry(feed_id.clone())
            .or_insert_with(|| Mutex::new(FeedState::new(String::new())));
        let mut guard = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Call once per normalized inbound event.
    pub fn record_message(&self, feed_id: &FeedId, payload_len: usize) {
        let now = Instant::now();
        self.with_feed(feed_id, |state| {
            state.message_count_window.push(now, 1);
            state.byte_count_window.push(now, payload_len as u64);
            state.payload_size_samples.push(now, payload_len as u64);
            state.messages_total += 1;
            state.bytes_total += payload_len as u64;
        });
    }

    pub fn record_upstream_status(&self, feed_id: &FeedId, connected: bool) {
        self.with_feed(feed_id, |state| {
            if state.connected != connected {
                tracing::debug!(feed_id = %feed_id, connected, "upstream status changed");
            }
            state.connected = connected;
        });
    }

    pub fn record_context_stats(
        &self,
        feed_id: &FeedId,
        item_count: usize,
        approx_bytes: usize,
        oldest_age_secs: f64,
    ) {
        self.with_feed(feed_id, |state| {
            state.context_item_count = item_count;
            state.context_approx_bytes = approx_bytes;
            state.context_oldest_age_secs = oldest_age_secs;
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_llm_request(
        &self,
        feed_id: &FeedId,
        input_tokens: u64,
        output_tokens: u64,
        ttft_ms: Option<u64>,
        total_gen_ms: u64,
        events_in_context: usize,
        is_error: bool,
    ) {
        let now = Instant::now();
        self.with_feed(feed_id, |state| {
            state.llm_requests_total += 1;
            if is_error {
                state.llm_errors_total += 1;
            }
            state.llm_input_tokens_total += input_tokens;
            state.llm_output_tokens_total += output_tokens;
            if let Some(ttft) = ttft_ms {
                state.ttft_ms_samples.push(now, ttft);
            }
            state.total_gen_ms_samples.push(now, total_gen_ms);
            state.events_in_context_last = events_in_context;
        });
    }

    /// Increment the per-feed parse-failure counter (spec §7 `ParseError`).
    pub fn record_parse_failure(&self, feed_id: &FeedId) {
        self.with_feed(feed_id, |state| state.parse_failures_total += 1);
    }

    /// Increment the per-feed backpressure-drop counter (spec §7
    /// `BackpressureDrop`; never surfaced to callers, only counted).
    pub fn record_backpressure_drop(&self, feed_id: &FeedId) {
        self.with_feed(feed_id, |state| state.backpressure_drops_total += 1);
    }

    /// Returns a consistent, per-feed immutable snapshot.
    pub fn get_metrics(&self) -> Snapshot {
        let now = Instant::now();
        let mut feeds: Vec<FeedSnapshot> = self
            .feeds
            .iter()
            .map(|entry| {
                let feed_id = entry.key().clone();
                let state = entry.value().lock().unwrap_or_else(|p| p.into_inner());
                FeedSnapshot {
                    feed_id,
                    name: state.name.clone(),
                    connected: state.connected,
                    messages_total: state.messages_total,
                    bytes_total: state.bytes_total,
                    message_rate_1s: state.message_count_window.rate_within(now, WINDOW_1S),
                    message_rate_10s: state.message_count_window.rate_within(now, WINDOW_10S),
                    message_rate_60s: state.message_count_window.rate_within(now, WINDOW_60S),
                    byte_rate_1s: state.byte_count_window.rate_within(now, WINDOW_1S),
                    payload_size_p50: state.payload_size_samples.percentile(50.0),
                    payload_size_p95: state.payload_size_samples.percentile(95.0),
                    payload_size_p99: state.payload_size_samples.percentile(99.0),
                    parse_failures_total: state.parse_failures_total,
                    backpressure_drops_total: state.backpressure_drops_total,
                    context_item_count: state.context_item_count,
                    context_approx_bytes: state.context_approx_bytes,
                    context_oldest_age_secs: state.context_oldest_age_secs,
                    llm_requests_total: state.llm_requests_total,
                    llm_errors_total: state.llm_errors_total,
                    llm_input_tokens_total: state.llm_input_tokens_total,
                    llm_output_tokens_total: state.llm_output_tokens_total,
                    ttft_ms_p50: state.ttft_ms_samples.percentile(50.0),
                    ttft_ms_p95: state.ttft_ms_samples.percentile(95.0),
                    total_gen_ms_avg: state.total_gen_ms_samples.average(),
                    events_in_context_last: state.events_in_context_last,
                }
            })
            .collect();
        feeds.sort_by(|a, b| a.feed_id.as_str().cmp(b.feed_id.as_str()));
        Snapshot { feeds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str) -> FeedId {
        FeedId::new(id)
    }

    #[test]
    fn init_feed_is_idempotent() {
        let m = MetricsCollector::new();
        m.init_feed(&feed("f1"), "Ticks");
        m.init_feed(&feed("f1"), "Ticks Renamed");
        let snap = m.get_metrics();
        assert_eq!(snap.feeds.len(), 1);
        // first InitFeed wins; re-init is a no-op per spec §4.1.
        assert_eq!(snap.feeds[0].name, "Ticks");
    }

    #[test]
    fn record_message_without_init_feed_implicitly_creates_empty_name() {
        let m = MetricsCollector::new();
        m.record_message(&feed("f1"), 10);
        let snap = m.get_metrics();
        assert_eq!(snap.feeds.len(), 1);
        assert_eq!(snap.feeds[0].name, "");
        assert_eq!(snap.feeds[0].messages_total, 1);
    }

    #[test]
    fn counters_are_monotonic_nondecreasing() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_message(&f, 10);
        let first = m.get_metrics().feeds[0].messages_total;
        m.record_message(&f, 20);
        let second = m.get_metrics().feeds[0].messages_total;
        assert!(second >= first);
        assert_eq!(second, 2);
    }

    #[test]
    fn record_message_twice_increments_total_by_exactly_two() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_message(&f, 5);
        m.record_message(&f, 5);
        assert_eq!(m.get_metrics().feeds[0].messages_total, 2);
    }

    #[test]
    fn upstream_status_toggles_connected_flag() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_upstream_status(&f, true);
        assert!(m.get_metrics().feeds[0].connected);
        m.record_upstream_status(&f, false);
        assert!(!m.get_metrics().feeds[0].connected);
    }

    #[test]
    fn llm_request_accumulates_tokens_and_errors() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_llm_request(&f, 100, 50, Some(120), 600, 10, false);
        m.record_llm_request(&f, 10, 0, None, 5, 0, true);
        let snap = &m.get_metrics().feeds[0];
        assert_eq!(snap.llm_requests_total, 2);
        assert_eq!(snap.events_in_context_last, 0, "events_in_context reflects the most recent request");
        assert_eq!(snap.llm_errors_total, 1);
        assert_eq!(snap.llm_input_tokens_total, 110);
        assert_eq!(snap.llm_output_tokens_total, 50);
        assert_eq!(snap.ttft_ms_p50, Some(120));
    }

    #[test]
    fn context_stats_are_sampled_not_accumulated() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_context_stats(&f, 10, 2048, 5.0);
        m.record_context_stats(&f, 3, 512, 1.0);
        let snap = &m.get_metrics().feeds[0];
        assert_eq!(snap.context_item_count, 3);
        assert_eq!(snap.context_approx_bytes, 512);
    }

    #[test]
    fn parse_failures_and_backpressure_drops_are_counted() {
        let m = MetricsCollector::new();
        let f = feed("f1");
        m.record_parse_failure(&f);
        m.record_parse_failure(&f);
        m.record_backpressure_drop(&f);
        let snap = &m.get_metrics().feeds[0];
        assert_eq!(snap.parse_failures_total, 2);
        assert_eq!(snap.backpressure_drops_total, 1);
    }

    #[test]
    fn snapshot_is_sorted_by_feed_id_for_stable_rendering() {
        let m = MetricsCollector::new();
        m.init_feed(&feed("zzz"), "Z");
        m.init_feed(&feed("aaa"), "A");
        let snap = m.get_metrics();
        assert_eq!(snap.feeds[0].feed_id.as_str(), "aaa");
        assert_eq!(snap.feeds[1].feed_id.as_str(), "zzz");
    }
}
