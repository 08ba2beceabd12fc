//! A session that never drains its outbound queue is disconnected once its
//! consecutive drop count reaches `N_drop_kill`, while a healthy sibling
//! session on the same feed keeps receiving every event uninterrupted
//! (spec §8, scenario 6; spec §4.6 backpressure isolation).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use ts_connector::{ingestion, run_connector, ConnectorConfig};
use ts_context::ContextRing;
use ts_dispatch::{run_feed_dispatch_loop, Dispatcher};
use ts_metrics::MetricsCollector;
use ts_protocol::{ConnectionType, FeedId, SessionId};
use ts_registry::SubscriptionRegistry;
use ts_test_utils::{fixtures, MockUpstreamServer, ScriptedFrame};

const Q_OUT: usize = 4;
const N_DROP_KILL: u32 = 2;

#[tokio::test]
async fn slow_consumer_is_killed_without_affecting_the_healthy_sibling() {
    let script: Vec<ScriptedFrame> = (0..8).map(|seq| ScriptedFrame::json(&json!({"seq": seq}))).collect();
    let server = MockUpstreamServer::start(script).await;
    let feed_id = FeedId::new("ticks");
    let feed = fixtures::feed_definition("ticks", ConnectionType::Websocket, &server.url());

    let context = Arc::new(ContextRing::new());
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(Q_OUT, N_DROP_KILL));

    let fast = SessionId::new("fast");
    let slow = SessionId::new("slow");
    let slow_cancel = CancellationToken::new();
    let mut fast_rx = dispatcher.register_session(fast.clone(), CancellationToken::new());
    let _slow_rx = dispatcher.register_session(slow.clone(), slow_cancel.clone());
    registry.subscribe(&fast, &feed_id).await;
    registry.subscribe(&slow, &feed_id).await;

    let fast_received = Arc::new(AtomicUsize::new(0));
    let counter = fast_received.clone();
    let drain = tokio::spawn(async move {
        while fast_rx.recv().await.is_some() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

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

    // Never read from `_slow_rx`: its queue fills, then every further
    // delivery attempt is a drop until the kill threshold is reached.
    sleep(Duration::from_millis(500)).await;

    assert!(slow_cancel.is_cancelled(), "slow session should have been killed");
    assert!(!dispatcher.is_registered(&slow), "killed session is deregistered");

    let subscribers = registry.subscribers_of(&feed_id).await;
    assert!(subscribers.contains(&fast));
    assert!(!subscribers.contains(&slow), "killed session is unsubscribed");

    shutdown.cancel();
    let _ = connector.await;
    let _ = dispatch.await;
    drain.abort();

    assert_eq!(fast_received.load(Ordering::Relaxed), 8, "healthy session saw every event");
}
