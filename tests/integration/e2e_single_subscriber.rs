//! A single session subscribes to one websocket feed and receives every
//! event the upstream emits, in order, normalized into its context ring
//! (spec §8, scenario 1).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use ts_connector::{ingestion, run_connector, ConnectorConfig};
use ts_context::ContextRing;
use ts_dispatch::{run_feed_dispatch_loop, Dispatcher};
use ts_metrics::MetricsCollector;
use ts_protocol::{ConnectionType, FeedId, SessionId};
use ts_registry::SubscriptionRegistry;
use ts_test_utils::{fixtures, MockUpstreamServer, ScriptedFrame};

#[tokio::test]
async fn single_subscriber_receives_every_event_in_order() {
    let script = vec![
        ScriptedFrame::json(&json!({"price": 101.5})),
        ScriptedFrame::json(&json!({"price": 102.0})),
        ScriptedFrame::json(&json!({"price": 102.5})),
    ];
    let server = MockUpstreamServer::start(script).await;
    let feed_id = FeedId::new("ticks");
    let feed = fixtures::feed_definition("ticks", ConnectionType::Websocket, &server.url());

    let context = Arc::new(ContextRing::new());
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(16, 100));

    let session_id = SessionId::new("s1");
    let session_cancel = CancellationToken::new();
    let mut outbox = dispatcher.register_session(session_id.clone(), session_cancel.clone());
    registry.subscribe(&session_id, &feed_id).await;

    let (ingest_tx, ingest_rx) = ingestion::channel(64);
    let (_count_tx, count_rx) = watch::channel(1usize);
    let shutdown = CancellationToken::new();

    let connector = tokio::spawn(run_connector(
        feed,
        context.clone(),
        metrics.clone(),
        ingest_tx,
        count_rx,
        shutdown.clone(),
        ConnectorConfig::default(),
        None,
    ));
    let dispatch = tokio::spawn(run_feed_dispatch_loop(
        feed_id.clone(),
        ingest_rx,
        registry.clone(),
        dispatcher.clone(),
        metrics.clone(),
        shutdown.clone(),
    ));

    for expected_price in [101.5, 102.0, 102.5] {
        let event = timeout(Duration::from_secs(2), outbox.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        let parsed: serde_json::Value = serde_json::from_slice(&event.payload).expect("json payload");
        assert_eq!(parsed["price"].as_f64(), Some(expected_price));
        assert_eq!(event.feed_id, feed_id);
    }

    let snapshot = context.snapshot(&feed_id).await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].data["price"].as_f64(), Some(102.5));

    let metrics_snapshot = metrics.get_metrics();
    let feed_metrics = metrics_snapshot
        .feeds
        .iter()
        .find(|f| f.feed_id == feed_id)
        .expect("feed metrics recorded");
    assert_eq!(feed_metrics.messages_total, 3);

    shutdown.cancel();
    let _ = connector.await;
    let _ = dispatch.await;
}
