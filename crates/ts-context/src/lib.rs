//! ts-context: the Context Ring (spec §4.2, component C2).
//!
//! Bounded, newest-first rolling buffer of recent normalized events per
//! feed, used as LLM grounding data by `ts-query`. One `tokio::sync::RwLock`
//! per feed inside a `DashMap`, per the concurrency model's "Context Ring:
//! one lock per feed" rule — grounded in the `usealtoal-edgelord` sibling's
//! `DashMap`-sharded state, generalizing the teacher's single coarse
//! `Arc<RwLock<HashMap<..>>>` (`services/server/src/state.rs`), which would
//! serialize all feeds behind one lock.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use ts_protocol::{DataFormat, FeedId};

const DEFAULT_N_CTX: usize = 100;

/// A normalized event stored in a feed's context ring. `data` is always a
/// JSON object (spec §4.2 normalization rules 1–3), carrying a `_timestamp`
/// key (rule 4).
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub data: Value,
}

/// Result of an `append`: how many entries were evicted (0 or 1) and the
/// ring's size afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    pub evicted: usize,
    pub new_size: usize,
}

struct Ring {
    entries: VecDeque<ContextEntry>,
    approx_bytes: usize,
    cap: usize,
}

impl Ring {
    fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            approx_bytes: 0,
            cap,
        }
    }
}

/// Normalizes and timestamps a raw inbound payload exactly as it would be
/// stored in the ring, without appending it. Used at the downstream WS
/// edge to shape a `feed-data` frame's `data` field identically to what
/// `Snapshot` would later show for the same event.
pub fn normalize_event_payload(payload: &[u8], format: DataFormat) -> Value {
    stamp(normalize(payload, format))
}

/// Normalizes a raw inbound payload into a JSON object per spec §4.2 rules
/// 1–3, given the feed's configured `DataFormat`.
fn normalize(payload: &[u8], format: DataFormat) -> Value {
    if matches!(format, DataFormat::Json) {
        if let Ok(parsed) = serde_json::from_slice::<Value>(payload) {
            return match parsed {
                Value::Object(_) => parsed,
                other => wrap_raw(other),
            };
        }
    }
    match std::str::from_utf8(payload) {
        Ok(s) => wrap_raw(Value::String(s.to_owned())),
        Err(_) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
            wrap_raw(Value::String(encoded))
        }
    }
}

fn wrap_raw(value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("raw".to_owned(), value);
    Value::Object(obj)
}

fn stamp(mut obj: Value) -> Value {
    if let Value::Object(ref mut map) = obj {
        map.insert(
            "_timestamp".to_owned(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
    obj
}

/// Per-feed bounded rolling buffer of normalized events (spec §4.2, C2).
#[derive(Default)]
pub struct ContextRing {
    rings: DashMap<FeedId, Arc<RwLock<Ring>>>,
    default_cap: usize,
}

impl ContextRing {
    pub fn new() -> Self {
        Self {
            rings: DashMap::new(),
            default_cap: DEFAULT_N_CTX,
        }
    }

    pub fn with_capacity(n_ctx: usize) -> Self {
        Self {
            rings: DashMap::new(),
            default_cap: n_ctx,
        }
    }

    fn ring_for(&self, feed_id: &FeedId) -> Arc<RwLock<Ring>> {
        self.rings
            .entry(feed_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Ring::new(self.default_cap))))
            .clone()
    }

    /// Normalizes `payload` per spec §4.2 rules and inserts it newest-first,
    /// evicting the oldest entry if the ring is at capacity.
    pub async fn append(&self, feed_id: &FeedId, payload: &[u8], format: DataFormat) -> EntrySummary {
        let normalized = stamp(normalize(payload, format));
        let approx = payload.len();
        let ring = self.ring_for(feed_id);
        let mut guard = ring.write().await;
        guard.entries.push_front(ContextEntry { data: normalized });
        guard.approx_bytes += approx;
        let mut evicted = 0;
        if guard.entries.len() > guard.cap {
            guard.entries.pop_back();
            evicted = 1;
        }
        EntrySummary {
            evicted,
            new_size: guard.entries.len(),
        }
    }

    /// Cheap read-only copy, newest first, length ≤ `N_ctx`.
    pub async fn snapshot(&self, feed_id: &FeedId) -> Vec<ContextEntry> {
        match self.rings.get(feed_id) {
            Some(ring) => ring.read().await.entries.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn clear(&self, feed_id: &FeedId) {
        if let Some(ring) = self.rings.get(feed_id) {
            let mut guard = ring.write().await;
            guard.entries.clear();
            guard.approx_bytes = 0;
        }
    }

    /// Item count, approximate total payload bytes retained, and the age
    /// in seconds of the oldest entry (for `ts-metrics::RecordContextStats`).
    pub async fn stats(&self, feed_id: &FeedId) -> (usize, usize, f64) {
        let Some(ring) = self.rings.get(feed_id) else {
            return (0, 0, 0.0);
        };
        let guard = ring.read().await;
        let oldest_age = guard
            .entries
            .back()
            .and_then(|e| e.data.get("_timestamp"))
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| (Utc::now() - ts.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        (guard.entries.len(), guard.approx_bytes, oldest_age.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str) -> FeedId {
        FeedId::new(id)
    }

    #[tokio::test]
    async fn json_object_payload_is_stored_as_is_with_timestamp() {
        let ring = ContextRing::new();
        let f = feed("f1");
        ring.append(&f, br#"{"price": 101.5}"#, DataFormat::Json).await;
        let snap = ring.snapshot(&f).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].data["price"], 101.5);
        assert!(snap[0].data.get("_timestamp").is_some());
    }

    #[tokio::test]
    async fn non_object_json_is_wrapped_in_raw() {
        let ring = ContextRing::new();
        let f = feed("f1");
        ring.append(&f, b"42", DataFormat::Json).await;
        let snap = ring.snapshot(&f).await;
        assert_eq!(snap[0].data["raw"], 42);
    }

    #[tokio::test]
    async fn non_json_payload_is_wrapped_as_raw_utf8() {
        let ring = ContextRing::new();
        let f = feed("f1");
        ring.append(&f, b"hello world", DataFormat::Text).await;
        let snap = ring.snapshot(&f).await;
        assert_eq!(snap[0].data["raw"], "hello world");
    }

    #[tokio::test]
    async fn non_utf8_payload_is_wrapped_as_base64() {
        let ring = ContextRing::new();
        let f = feed("f1");
        let payload = [0xff, 0xfe, 0x00, 0x80];
        ring.append(&f, &payload, DataFormat::Text).await;
        let snap = ring.snapshot(&f).await;
        let encoded = snap[0].data["raw"].as_str().unwrap();
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap(),
            payload
        );
    }

    #[tokio::test]
    async fn overflow_evicts_exactly_the_oldest_entry() {
        let ring = ContextRing::with_capacity(3);
        let f = feed("f1");
        for payload in ["\"A\"", "\"B\"", "\"C\"", "\"D\"", "\"E\""] {
            ring.append(&f, payload.as_bytes(), DataFormat::Json).await;
        }
        let snap = ring.snapshot(&f).await;
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].data["raw"], "E");
        assert_eq!(snap[1].data["raw"], "D");
        assert_eq!(snap[2].data["raw"], "C");
    }

    #[tokio::test]
    async fn append_summary_reports_eviction_and_size() {
        let ring = ContextRing::with_capacity(1);
        let f = feed("f1");
        let s1 = ring.append(&f, b"\"A\"", DataFormat::Json).await;
        assert_eq!(s1, EntrySummary { evicted: 0, new_size: 1 });
        let s2 = ring.append(&f, b"\"B\"", DataFormat::Json).await;
        assert_eq!(s2, EntrySummary { evicted: 1, new_size: 1 });
    }

    #[tokio::test]
    async fn duplicate_payload_produces_two_distinct_entries() {
        let ring = ContextRing::new();
        let f = feed("f1");
        ring.append(&f, br#"{"x":1}"#, DataFormat::Json).await;
        ring.append(&f, br#"{"x":1}"#, DataFormat::Json).await;
        assert_eq!(ring.snapshot(&f).await.len(), 2);
    }

    #[tokio::test]
    async fn clear_empties_the_ring() {
        let ring = ContextRing::new();
        let f = feed("f1");
        ring.append(&f, br#"{"x":1}"#, DataFormat::Json).await;
        ring.clear(&f).await;
        assert!(ring.snapshot(&f).await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_of_unknown_feed_is_empty() {
        let ring = ContextRing::new();
        assert!(ring.snapshot(&feed("nope")).await.is_empty());
    }
}
