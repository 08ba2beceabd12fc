//! External-collaborator traits (spec §6): the persistent catalog of feed
//! definitions and subscriptions is explicitly out of scope for the core
//! (spec §1's Non-goals) — this crate only defines the interfaces the
//! core consumes, plus an in-memory test double for integration tests and
//! example wiring. A real deployment supplies its own implementation
//! backed by a document store.
//!
//! `OnFeedChanged(callback)` is expressed here as a `broadcast::Receiver`
//! subscription rather than a registered callback, the idiomatic Rust
//! rendering of an invalidation stream — the same pattern the teacher
//! uses for its dashboard event fan-out (`services/server/src/state.rs`'s
//! `dashboard_tx: broadcast::Sender<DashboardEvent>`).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use ts_protocol::{FeedDefinition, FeedId};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("feed not found: {0}")]
    NotFound(FeedId),
    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// The catalog collaborator the core depends on for feed definitions and
/// subscription records (spec §6).
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_feed(&self, feed_id: &FeedId) -> Result<FeedDefinition, CatalogError>;

    /// Subscribes to feed-invalidation notifications. The core reloads a
    /// cached `FeedDefinition` whenever its `FeedId` is published here.
    fn subscribe_invalidations(&self) -> broadcast::Receiver<FeedId>;

    /// The feeds `user_id` was previously subscribed to, for session
    /// restoration.
    async fn get_subscription_catalog(&self, user_id: &str) -> Result<Vec<FeedId>, CatalogError>;
}

/// In-memory `Catalog` test double. Not intended for production use —
/// nothing here persists across a restart.
pub struct InMemoryCatalog {
    feeds: dashmap::DashMap<FeedId, FeedDefinition>,
    subscriptions: dashmap::DashMap<String, Vec<FeedId>>,
    invalidations: broadcast::Sender<FeedId>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        let (invalidations, _rx) = broadcast::channel(256);
        Self {
            feeds: dashmap::DashMap::new(),
            subscriptions: dashmap::DashMap::new(),
            invalidations,
        }
    }

    /// Inserts or replaces a feed definition and notifies subscribers of
    /// the change.
    pub fn put_feed(&self, feed: FeedDefinition) {
        let feed_id = feed.feed_id.clone();
        self.feeds.insert(feed_id.clone(), feed);
        let _ = self.invalidations.send(feed_id);
    }

    pub fn remove_feed(&self, feed_id: &FeedId) {
        self.feeds.remove(feed_id);
        let _ = self.invalidations.send(feed_id.clone());
    }

    pub fn set_subscription_catalog(&self, user_id: impl Into<String>, feeds: Vec<FeedId>) {
        self.subscriptions.insert(user_id.into(), feeds);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_feed(&self, feed_id: &FeedId) -> Result<FeedDefinition, CatalogError> {
        self.feeds
            .get(feed_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CatalogError::NotFound(feed_id.clone()))
    }

    fn subscribe_invalidations(&self) -> broadcast::Receiver<FeedId> {
        self.invalidations.subscribe()
    }

    async fn get_subscription_catalog(&self, user_id: &str) -> Result<Vec<FeedId>, CatalogError> {
        Ok(self
            .subscriptions
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_protocol::{ConnectionType, DataFormat};

    fn sample_feed(id: &str) -> FeedDefinition {
        FeedDefinition {
            feed_id: FeedId::new(id),
            name: "Ticks".to_owned(),
            category: "markets".to_owned(),
            connection_type: ConnectionType::Websocket,
            url: "wss://example.com".to_owned(),
            query_params: vec![],
            headers: vec![],
            connection_messages: vec![],
            event_name: String::new(),
            data_format: DataFormat::Json,
            protobuf_type: None,
            reconnection_enabled: true,
            reconnection_delay_ms: 1000,
            reconnection_attempts: 0,
            http_polling_config: None,
            system_prompt: None,
            default_ai_prompt: None,
            ai_analysis_enabled: true,
        }
    }

    #[tokio::test]
    async fn get_feed_returns_not_found_for_unknown_id() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.get_feed(&FeedId::new("missing")).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_feed_makes_it_retrievable() {
        let catalog = InMemoryCatalog::new();
        catalog.put_feed(sample_feed("f1"));
        let fetched = catalog.get_feed(&FeedId::new("f1")).await.unwrap();
        assert_eq!(fetched.name, "Ticks");
    }

    #[tokio::test]
    async fn put_feed_publishes_an_invalidation() {
        let catalog = InMemoryCatalog::new();
        let mut rx = catalog.subscribe_invalidations();
        catalog.put_feed(sample_feed("f1"));
        let changed = rx.recv().await.unwrap();
        assert_eq!(changed, FeedId::new("f1"));
    }

    #[tokio::test]
    async fn subscription_catalog_defaults_to_empty() {
        let catalog = InMemoryCatalog::new();
        let feeds = catalog.get_subscription_catalog("u1").await.unwrap();
        assert!(feeds.is_empty());
    }

    #[tokio::test]
    async fn subscription_catalog_returns_what_was_set() {
        let catalog = InMemoryCatalog::new();
        catalog.set_subscription_catalog("u1", vec![FeedId::new("f1"), FeedId::new("f2")]);
        let feeds = catalog.get_subscription_catalog("u1").await.unwrap();
        assert_eq!(feeds, vec![FeedId::new("f1"), FeedId::new("f2")]);
    }
}
