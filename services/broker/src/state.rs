//! Shared application state (spec §5: "No global mutable state other than
//! the singleton Context Ring, Metrics Collector, and Subscription
//! Registry"). One `AppState` is built at startup and cloned (cheaply —
//! every field is an `Arc`) into every connection handler, directly
//! grounded in the teacher's `AppState` (`services/server/src/state.rs`).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use ts_catalog::{Catalog, InMemoryCatalog};
use ts_context::ContextRing;
use ts_dispatch::Dispatcher;
use ts_metrics::MetricsCollector;
use ts_query::QueryService;
use ts_registry::SubscriptionRegistry;

use crate::config::BrokerConfig;
use crate::feeds::FeedSupervisor;
use crate::providers;

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

struct Inner {
    context: Arc<ContextRing>,
    metrics: Arc<MetricsCollector>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    catalog: Arc<dyn Catalog>,
    query: Arc<QueryService>,
    feeds: Arc<FeedSupervisor>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn build(config: &BrokerConfig, shutdown: CancellationToken) -> Self {
        let context = Arc::new(ContextRing::with_capacity(config.tunables.n_ctx));
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(config.tunables.q_out, config.tunables.n_drop_kill));

        let catalog = Arc::new(InMemoryCatalog::new());
        for feed in &config.feeds {
            catalog.put_feed(feed.clone());
        }
        let catalog: Arc<dyn Catalog> = catalog;

        let provider_registry = providers::build_registry(&config.providers);
        let query = Arc::new(QueryService::new(context.clone(), metrics.clone(), catalog.clone(), provider_registry));

        let feeds = Arc::new(FeedSupervisor::new(
            context.clone(),
            metrics.clone(),
            registry.clone(),
            dispatcher.clone(),
            catalog.clone(),
            config.tunables.q_in,
            config.tunables.connector.clone(),
            None,
            shutdown.clone(),
        ));
        feeds.spawn_invalidation_listener();

        Self(Arc::new(Inner {
            context,
            metrics,
            registry,
            dispatcher,
            catalog,
            query,
            feeds,
            shutdown,
        }))
    }

    pub fn context(&self) -> &Arc<ContextRing> {
        &self.0.context
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.0.metrics
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.0.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.0.dispatcher
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.0.catalog
    }

    pub fn query(&self) -> &Arc<QueryService> {
        &self.0.query
    }

    pub fn feeds(&self) -> &Arc<FeedSupervisor> {
        &self.0.feeds
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.0.shutdown
    }
}
