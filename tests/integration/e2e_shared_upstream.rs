//! Two sessions subscribed to the same feed share a single upstream
//! connection and each receive every event independently (spec §8,
//! scenario 2: one connector per `FeedID`, fanned out by the dispatcher).

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
async fn two_sessions_on_one_feed_each_see_every_event() {
    let script = vec![
        ScriptedFrame::json(&json!({"seq": 1})),
        ScriptedFrame::json(&json!({"seq": 2})),
    ];
    let server = MockUpstreamServer::start(script).await;
    let feed_id = FeedId::new("ticks");
    let feed = fixtures::feed_definition("ticks", ConnectionType::Websocket, &server.url());

    let context = Arc::new(ContextRing::new());
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(16, 100));

    let s1 = SessionId::new("s1");
    let s2 = SessionId::new("s2");
    let mut rx1 = dispatcher.register_session(s1.clone(), CancellationToken::new());
    let mut rx2 = dispatcher.register_session(s2.clone(), CancellationToken::new());
    registry.subscribe(&s1, &feed_id).await;
    registry.subscribe(&s2, &feed_id).await;

    assert_eq!(registry.subscribers_of(&feed_id).await.len(), 2);

    let (ingest_tx, ingest_rx) = ingestion::channel(64);
    let (_count_tx, count_rx) = watch::channel(2usize);
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

    for expected_seq in [1, 2] {
        let e1 = timeout(Duration::from_secs(2), rx1.recv()).await.unwrap().unwrap();
        let e2 = timeout(Duration::from_secs(2), rx2.recv()).await.unwrap().unwrap();
        let p1: serde_json::Value = serde_json::from_slice(&e1.payload).unwrap();
        let p2: serde_json::Value = serde_json::from_slice(&e2.payload).unwrap();
        assert_eq!(p1["seq"].as_i64(), Some(expected_seq));
        assert_eq!(p2["seq"].as_i64(), Some(expected_seq));
    }

    shutdown.cancel();
    let _ = connector.await;
    let _ = dispatch.await;
}
