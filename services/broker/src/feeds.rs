//! Lazily spawns and tears down the per-feed Feed Connector + Fan-out
//! Dispatcher task pair on first subscriber (spec §4.4/§4.6), the way the
//! teacher lazily spins up a forwarder-facing task per device connection
//! rather than keeping every possible device's task alive up front
//! (`services/server/src/ws_forwarder.rs`).
//!
//! A feed's pair of tasks exits on its own once the Feed Connector
//! observes `T_linger` with zero subscribers (see `ts_connector::dial`).
//! `ensure_running` notices a finished task next time the feed gains a
//! subscriber and respawns it, so a feed can cycle through connect/linger
//! any number of times over the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ts_catalog::{Catalog, CatalogError};
use ts_connector::{ingestion, ConnectorConfig, ProtobufRegistry};
use ts_context::ContextRing;
use ts_dispatch::{run_feed_dispatch_loop, Dispatcher};
use ts_metrics::MetricsCollector;
use ts_protocol::FeedId;
use ts_registry::SubscriptionRegistry;

/// How often a running feed's Context Ring is sampled into `ts-metrics`
/// (spec §4.1 `RecordContextStats` — "sampled", not event-driven).
const CONTEXT_STATS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

struct FeedTask {
    subscriber_count: watch::Sender<usize>,
    /// Cancelling this tears down just this feed's connector/dispatch/
    /// sampler trio, independent of process-wide `shutdown`, so a catalog
    /// invalidation can force a respawn without affecting other feeds.
    restart: CancellationToken,
    connector: JoinHandle<()>,
    _dispatch: JoinHandle<()>,
    _stats_sampler: JoinHandle<()>,
}

pub struct FeedSupervisor {
    context: Arc<ContextRing>,
    metrics: Arc<MetricsCollector>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    catalog: Arc<dyn Catalog>,
    q_in: usize,
    connector_config: ConnectorConfig,
    protobuf: ProtobufRegistry,
    shutdown: CancellationToken,
    tasks: DashMap<FeedId, FeedTask>,
}

impl FeedSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: Arc<ContextRing>,
        metrics: Arc<MetricsCollector>,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Arc<Dispatcher>,
        catalog: Arc<dyn Catalog>,
        q_in: usize,
        connector_config: ConnectorConfig,
        protobuf: ProtobufRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            metrics,
            registry,
            dispatcher,
            catalog,
            q_in,
            connector_config,
            protobuf,
            shutdown,
            tasks: DashMap::new(),
        }
    }

    /// Called whenever a session newly subscribes to `feed_id`: makes sure
    /// the feed's connector/dispatcher pair is running and bumps its
    /// subscriber count so the connector's linger timer resets.
    pub async fn note_subscribed(&self, feed_id: &FeedId) -> Result<(), CatalogError> {
        self.ensure_running(feed_id).await?;
        if let Some(task) = self.tasks.get(feed_id) {
            task.subscriber_count.send_modify(|c| *c += 1);
        }
        Ok(())
    }

    /// Called whenever a session unsubscribes (including on disconnect).
    /// The feed keeps running until its connector observes `T_linger`
    /// with the count at zero.
    pub fn note_unsubscribed(&self, feed_id: &FeedId) {
        if let Some(task) = self.tasks.get(feed_id) {
            task.subscriber_count.send_modify(|c| *c = c.saturating_sub(1));
        }
    }

    async fn ensure_running(&self, feed_id: &FeedId) -> Result<(), CatalogError> {
        if let Some(existing) = self.tasks.get(feed_id) {
            if !existing.connector.is_finished() {
                return Ok(());
            }
        }
        let feed = self.catalog.get_feed(feed_id).await?;
        info!(feed_id = %feed_id, "spawning feed connector");

        let (ingest_tx, ingest_rx) = ingestion::channel(self.q_in);
        let (count_tx, count_rx) = watch::channel(0usize);
        let restart = self.shutdown.child_token();
        let feed_shutdown = restart.clone();

        let connector = tokio::spawn(ts_connector::run_connector(
            feed,
            self.context.clone(),
            self.metrics.clone(),
            ingest_tx,
            count_rx,
            feed_shutdown.clone(),
            self.connector_config.clone(),
            self.protobuf.clone(),
        ));
        let dispatch = tokio::spawn(run_feed_dispatch_loop(
            feed_id.clone(),
            ingest_rx,
            self.registry.clone(),
            self.dispatcher.clone(),
            self.metrics.clone(),
            feed_shutdown.clone(),
        ));
        let stats_sampler = tokio::spawn(run_context_stats_sampler(
            feed_id.clone(),
            self.context.clone(),
            self.metrics.clone(),
            feed_shutdown,
        ));

        self.tasks.insert(
            feed_id.clone(),
            FeedTask {
                subscriber_count: count_tx,
                restart,
                connector,
                _dispatch: dispatch,
                _stats_sampler: stats_sampler,
            },
        );
        Ok(())
    }

    /// Spawns the long-lived task that reloads a running feed whenever the
    /// catalog publishes an invalidation for it (spec §6 `OnFeedChanged`).
    /// Call once, after construction.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut invalidations = supervisor.catalog.subscribe_invalidations();
            loop {
                tokio::select! {
                    () = supervisor.shutdown.cancelled() => break,
                    result = invalidations.recv() => match result {
                        Ok(feed_id) => supervisor.handle_invalidation(&feed_id).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "catalog invalidation stream lagged, some reloads may be missed");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// A feed definition changed upstream: tear down its running connector/
    /// dispatcher/sampler trio (if any) and respawn it against a freshly
    /// fetched `FeedDefinition`, preserving the live subscriber count.
    async fn handle_invalidation(&self, feed_id: &FeedId) {
        let had_task = if let Some((_, task)) = self.tasks.remove(feed_id) {
            task.restart.cancel();
            let _ = task.connector.await;
            true
        } else {
            false
        };
        if !had_task {
            return;
        }

        let subscriber_count = self.registry.subscribers_of(feed_id).await.len();
        if subscriber_count == 0 {
            return;
        }
        info!(feed_id = %feed_id, "reloading feed after catalog invalidation");
        if let Err(e) = self.ensure_running(feed_id).await {
            warn!(feed_id = %feed_id, error = %e, "failed to reload feed after catalog invalidation");
            return;
        }
        if let Some(task) = self.tasks.get(feed_id) {
            task.subscriber_count.send_replace(subscriber_count);
        }
    }
}

/// Periodically samples `feed_id`'s Context Ring and reports the result to
/// `ts-metrics` (spec §4.1 `RecordContextStats`). Runs for as long as the
/// feed's connector/dispatcher pair does.
async fn run_context_stats_sampler(
    feed_id: FeedId,
    ctx: Arc<ContextRing>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(CONTEXT_STATS_SAMPLE_INTERVAL);
    tick.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let (item_count, approx_bytes, oldest_age_secs) = ctx.stats(&feed_id).await;
                metrics.record_context_stats(&feed_id, item_count, approx_bytes, oldest_age_secs);
            }
        }
    }
}
