//! ts-registry: the Subscription Registry (spec §4.5, component C5).
//!
//! Maps feed → subscriber-session set and session → subscribed-feed set.
//! Sharded by key using `DashMap`, with one `tokio::sync::RwLock` per
//! entry — directly grounded in the teacher's `active_receiver_sessions:
//! Arc<RwLock<HashMap<..>>>` registry (`services/server/src/state.rs`),
//! generalized from one coarse lock to per-key sharding because spec §5
//! requires a per-`FeedID` lock here where the teacher's single registry
//! entry type does not need one. `RemoveSession` — the only operation that
//! must touch more than one feed — acquires feed locks in ascending
//! `FeedID` order to avoid deadlock, per spec §5.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ts_protocol::{FeedId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub already_subscribed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    pub last_subscriber: bool,
}

type FeedSet = Arc<RwLock<HashSet<SessionId>>>;
type SessionSet = Arc<RwLock<HashSet<FeedId>>>;

/// Maps feed → subscriber sessions and session → subscribed feeds (spec
/// §4.5, C5).
#[derive(Default)]
pub struct SubscriptionRegistry {
    feed_subscribers: DashMap<FeedId, FeedSet>,
    session_feeds: DashMap<SessionId, SessionSet>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn feed_set(&self, feed_id: &FeedId) -> FeedSet {
        self.feed_subscribers
            .entry(feed_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(HashSet::new())))
            .clone()
    }

    fn session_set(&self, session_id: &SessionId) -> SessionSet {
        self.session_feeds
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(HashSet::new())))
            .clone()
    }

    /// Returns whether the `(session, feed)` pair already existed.
    pub async fn subscribe(&self, session_id: &SessionId, feed_id: &FeedId) -> SubscribeOutcome {
        let feed_set = self.feed_set(feed_id);
        let already_subscribed = {
            let mut guard = feed_set.write().await;
            !guard.insert(session_id.clone())
        };
        let session_set = self.session_set(session_id);
        session_set.write().await.insert(feed_id.clone());
        SubscribeOutcome { already_subscribed }
    }

    /// Returns whether this removed the final subscriber on `feed_id`.
    pub async fn unsubscribe(&self, session_id: &SessionId, feed_id: &FeedId) -> UnsubscribeOutcome {
        let feed_set = self.feed_set(feed_id);
        let last_subscriber = {
            let mut guard = feed_set.write().await;
            let removed = guard.remove(session_id);
            removed && guard.is_empty()
        };
        if let Some(session_set) = self.session_feeds.get(session_id) {
            session_set.write().await.remove(feed_id);
        }
        UnsubscribeOutcome { last_subscriber }
    }

    /// Snapshot of sessions currently subscribed to `feed_id`.
    pub async fn subscribers_of(&self, feed_id: &FeedId) -> Vec<SessionId> {
        match self.feed_subscribers.get(feed_id) {
            Some(set) => set.read().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of feeds `session_id` is currently subscribed to.
    pub async fn feeds_of(&self, session_id: &SessionId) -> Vec<FeedId> {
        match self.session_feeds.get(session_id) {
            Some(set) => set.read().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Atomically removes `session_id` from every feed it subscribes to.
    /// Returns the feeds that lost their last subscriber as a result.
    /// Feed locks are acquired in ascending `FeedID` order (spec §5).
    pub async fn remove_session(&self, session_id: &SessionId) -> Vec<FeedId> {
        let mut feeds = self.feeds_of(session_id).await;
        feeds.sort();

        let mut lost_last_subscriber = Vec::new();
        for feed_id in &feeds {
            let feed_set = self.feed_set(feed_id);
            let mut guard = feed_set.write().await;
            let removed = guard.remove(session_id);
            if removed && guard.is_empty() {
                lost_last_subscriber.push(feed_id.clone());
            }
        }
        self.session_feeds.remove(session_id);
        lost_last_subscriber
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(id: &str) -> SessionId {
        SessionId::new(id)
    }

    fn fid(id: &str) -> FeedId {
        FeedId::new(id)
    }

    #[tokio::test]
    async fn subscribe_reports_whether_pair_already_existed() {
        let registry = SubscriptionRegistry::new();
        let first = registry.subscribe(&sid("s1"), &fid("f1")).await;
        assert!(!first.already_subscribed);
        let second = registry.subscribe(&sid("s1"), &fid("f1")).await;
        assert!(second.already_subscribed);
    }

    #[tokio::test]
    async fn unsubscribe_reports_last_subscriber() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&sid("s1"), &fid("f1")).await;
        registry.subscribe(&sid("s2"), &fid("f1")).await;

        let outcome = registry.unsubscribe(&sid("s1"), &fid("f1")).await;
        assert!(!outcome.last_subscriber);

        let outcome = registry.unsubscribe(&sid("s2"), &fid("f1")).await;
        assert!(outcome.last_subscriber);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_is_a_no_op_round_trip() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&sid("s1"), &fid("f1")).await;
        registry.unsubscribe(&sid("s1"), &fid("f1")).await;
        assert!(registry.subscribers_of(&fid("f1")).await.is_empty());
        assert!(registry.feeds_of(&sid("s1")).await.is_empty());
    }

    #[tokio::test]
    async fn subscribers_of_and_feeds_of_are_consistent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&sid("s1"), &fid("f1")).await;
        registry.subscribe(&sid("s1"), &fid("f2")).await;
        registry.subscribe(&sid("s2"), &fid("f1")).await;

        let mut subs_f1 = registry.subscribers_of(&fid("f1")).await;
        subs_f1.sort();
        assert_eq!(subs_f1, vec![sid("s1"), sid("s2")]);

        let mut feeds_s1 = registry.feeds_of(&sid("s1")).await;
        feeds_s1.sort();
        assert_eq!(feeds_s1, vec![fid("f1"), fid("f2")]);
    }

    #[tokio::test]
    async fn remove_session_is_equivalent_to_unsubscribing_from_every_feed() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&sid("s1"), &fid("f1")).await;
        registry.subscribe(&sid("s1"), &fid("f2")).await;
        registry.subscribe(&sid("s2"), &fid("f1")).await;

        let mut lost = registry.remove_session(&sid("s1")).await;
        lost.sort();
        assert_eq!(lost, vec![fid("f2")]);

        assert!(registry.feeds_of(&sid("s1")).await.is_empty());
        assert_eq!(registry.subscribers_of(&fid("f1")).await, vec![sid("s2")]);
        assert!(registry.subscribers_of(&fid("f2")).await.is_empty());
    }

    #[tokio::test]
    async fn remove_session_with_no_subscriptions_returns_empty() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.remove_session(&sid("ghost")).await.is_empty());
    }
}
