//! Shared per-event processing: every parsed upstream payload, regardless
//! of transport, goes through the same three steps (spec §4.4: "For each
//! event the connector: (a) appends to C2, (b) calls `C1.RecordMessage`,
//! (c) hands the event to C6's ingestion channel").

use std::sync::Arc;

use ts_context::ContextRing;
use ts_metrics::MetricsCollector;
use ts_protocol::{FeedDefinition, FeedEvent};

use crate::ingestion;

pub(crate) async fn emit(
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    event_name: &str,
    payload: Vec<u8>,
) {
    ctx.append(&feed.feed_id, &payload, feed.data_format).await;
    metrics.record_message(&feed.feed_id, payload.len());
    let event = FeedEvent::new(feed.feed_id.clone(), feed.name.clone(), event_name, payload);
    ingest.push(event).await;
}

/// Decodes a `protobuf`-formatted payload into a JSON-like byte
/// representation, via an out-of-band registry supplied by the composition
/// root. No protobuf crate is part of this workspace's dependency stack
/// (none appears anywhere in the retrieval pack), so in the absence of a
/// decoder a `protobuf` feed's frames are treated as parse failures —
/// counted, logged, and dropped, never disconnecting the feed (spec §7
/// `ParseError`).
pub trait ProtobufDecoder: Send + Sync {
    fn decode(&self, type_name: &str, payload: &[u8]) -> Option<Vec<u8>>;
}

pub type ProtobufRegistry = Option<Arc<dyn ProtobufDecoder>>;
