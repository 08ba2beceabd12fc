//! Fan-out Dispatcher (spec §4.6, component C6): one task per active feed
//! drains that feed's ingestion channel (`ts_connector::ingestion`) and
//! delivers each event to every currently subscribed session's bounded
//! outbound queue. A session that cannot keep up has events dropped for
//! it alone — other subscribers are unaffected — and is disconnected once
//! its consecutive-drop count reaches `N_drop_kill`.
//!
//! Grounded in the teacher's per-key registry style in
//! `services/server/src/state.rs` (`BroadcastRegistry`), generalized from
//! a uniform `tokio::sync::broadcast` (which drops for every receiver
//! alike) to per-session bounded `mpsc` queues, since spec §4.6 requires
//! independent backpressure and a kill threshold per session that
//! `broadcast` cannot express.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ts_connector::ingestion;
use ts_metrics::MetricsCollector;
use ts_protocol::{FeedEvent, FeedId, SessionId};
use ts_registry::SubscriptionRegistry;

/// Default per-session outbound queue capacity (spec §6 tunables).
pub const DEFAULT_Q_OUT: usize = 256;
/// Default consecutive-drop threshold before a session is killed.
pub const DEFAULT_N_DROP_KILL: u32 = 1024;

struct SessionOutbox {
    tx: mpsc::Sender<Arc<FeedEvent>>,
    consecutive_drops: AtomicU32,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Delivered,
    Dropped,
    Killed,
}

/// Registers per-session outbound queues and fans events out to them.
pub struct Dispatcher {
    outboxes: DashMap<SessionId, Arc<SessionOutbox>>,
    q_out: usize,
    n_drop_kill: u32,
}

impl Dispatcher {
    pub fn new(q_out: usize, n_drop_kill: u32) -> Self {
        Self {
            outboxes: DashMap::new(),
            q_out,
            n_drop_kill,
        }
    }

    /// Registers a session's outbound queue and returns the receiving
    /// half, which the session's writer task drains. `cancel` is
    /// triggered by the dispatcher if this session is later killed for
    /// unresponsiveness; the writer task observes it to close the
    /// connection.
    pub fn register_session(
        &self,
        session_id: SessionId,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Arc<FeedEvent>> {
        let (tx, rx) = mpsc::channel(self.q_out);
        self.outboxes.insert(
            session_id,
            Arc::new(SessionOutbox {
                tx,
                consecutive_drops: AtomicU32::new(0),
                cancel,
            }),
        );
        rx
    }

    pub fn deregister_session(&self, session_id: &SessionId) {
        self.outboxes.remove(session_id);
    }

    pub fn is_registered(&self, session_id: &SessionId) -> bool {
        self.outboxes.contains_key(session_id)
    }

    fn dispatch_to_session(&self, session_id: &SessionId, event: &Arc<FeedEvent>) -> DispatchOutcome {
        let Some(outbox) = self.outboxes.get(session_id) else {
            return DispatchOutcome::Dropped;
        };
        match outbox.tx.try_send(event.clone()) {
            Ok(()) => {
                outbox.consecutive_drops.store(0, Ordering::Relaxed);
                DispatchOutcome::Delivered
            }
            Err(_) => {
                let drops = outbox.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if drops >= self.n_drop_kill {
                    outbox.cancel.cancel();
                    drop(outbox);
                    self.outboxes.remove(session_id);
                    DispatchOutcome::Killed
                } else {
                    DispatchOutcome::Dropped
                }
            }
        }
    }
}

/// Drains `feed_id`'s ingestion channel and fans each event out to its
/// current subscribers, consulting the registry fresh on every event so
/// that a subscribe/unsubscribe that lands between two deliveries is
/// observed (spec §4.5's consistency guarantee).
pub async fn run_feed_dispatch_loop(
    feed_id: FeedId,
    mut ingest: ingestion::Receiver<FeedEvent>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = ingest.recv() => event,
        };
        let event = Arc::new(event);
        let subscribers = registry.subscribers_of(&feed_id).await;
        for session_id in &subscribers {
            match dispatcher.dispatch_to_session(session_id, &event) {
                DispatchOutcome::Delivered => {}
                DispatchOutcome::Dropped => {
                    metrics.record_backpressure_drop(&feed_id);
                }
                DispatchOutcome::Killed => {
                    metrics.record_backpressure_drop(&feed_id);
                    warn!(feed_id = %feed_id, session_id = %session_id.as_str(), "session unresponsive, disconnecting");
                    registry.unsubscribe(session_id, &feed_id).await;
                }
            }
        }
        debug!(feed_id = %feed_id, subscriber_count = subscribers.len(), "dispatched event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_protocol::ReceivedAt;

    fn sample_event(feed_id: &FeedId) -> FeedEvent {
        FeedEvent {
            feed_id: feed_id.clone(),
            feed_name: "Ticks".to_owned(),
            event_name: String::new(),
            payload: b"{}".to_vec(),
            received_at: ReceivedAt::now(),
        }
    }

    #[tokio::test]
    async fn delivered_events_reset_the_drop_counter() {
        let dispatcher = Dispatcher::new(4, 3);
        let session = SessionId::new("s1");
        let mut rx = dispatcher.register_session(session.clone(), CancellationToken::new());
        let feed = FeedId::new("f1");
        let event = Arc::new(sample_event(&feed));

        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap().feed_id, feed);
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_session_only() {
        let dispatcher = Dispatcher::new(1, 10);
        let session = SessionId::new("s1");
        let _rx = dispatcher.register_session(session.clone(), CancellationToken::new());
        let feed = FeedId::new("f1");
        let event = Arc::new(sample_event(&feed));

        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Delivered);
        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Dropped);
    }

    #[tokio::test]
    async fn consecutive_drops_reaching_threshold_kill_the_session() {
        let dispatcher = Dispatcher::new(1, 2);
        let session = SessionId::new("s1");
        let cancel = CancellationToken::new();
        let _rx = dispatcher.register_session(session.clone(), cancel.clone());
        let feed = FeedId::new("f1");
        let event = Arc::new(sample_event(&feed));

        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Delivered);
        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Dropped);
        assert_eq!(dispatcher.dispatch_to_session(&session, &event), DispatchOutcome::Killed);
        assert!(cancel.is_cancelled());
        assert!(!dispatcher.is_registered(&session));
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_session_is_a_drop() {
        let dispatcher = Dispatcher::new(4, 3);
        let feed = FeedId::new("f1");
        let event = Arc::new(sample_event(&feed));
        let outcome = dispatcher.dispatch_to_session(&SessionId::new("ghost"), &event);
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }
}
