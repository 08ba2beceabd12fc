//! Querying a feed with an empty context ring returns the canned "no
//! data" answer without ever invoking a provider (spec §8, scenario 4;
//! spec §4.7 step 1).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use ts_catalog::InMemoryCatalog;
use ts_context::ContextRing;
use ts_llm::{ChatResult, Message, Provider, ProviderError, StreamResult};
use ts_metrics::MetricsCollector;
use ts_protocol::{ConnectionType, DataFormat, FeedDefinition, FeedId};
use ts_query::{ProviderRegistry, QueryRequest, QueryService};

/// A provider that panics if invoked — this test asserts it never is.
struct UnreachableProvider;

#[async_trait]
impl Provider for UnreachableProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn chat(&self, _cancel: &CancellationToken, _messages: &[Message]) -> Result<ChatResult, ProviderError> {
        panic!("provider must not be called when context is empty");
    }

    async fn stream_chat(
        &self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        _sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError> {
        panic!("provider must not be called when context is empty");
    }
}

fn sample_feed() -> FeedDefinition {
    FeedDefinition {
        feed_id: FeedId::new("ticks"),
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
async fn query_against_empty_context_never_touches_a_provider() {
    let context = Arc::new(ContextRing::new());
    let metrics = Arc::new(MetricsCollector::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.put_feed(sample_feed());
    let providers = ProviderRegistry::new(vec![Arc::new(UnreachableProvider)]);

    let service = QueryService::new(context, metrics.clone(), catalog, providers);
    let response = service
        .query(
            QueryRequest {
                feed_id: FeedId::new("ticks"),
                question: "what's happening?".to_owned(),
                provider: None,
                system_prompt_override: None,
            },
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(response.provider_name, "none");
    assert!(response.answer.contains("No data"));
    assert!(response.error_kind.is_none());
    assert_eq!(response.tokens_used, 0);

    let snapshot = metrics.get_metrics();
    let feed_metrics = snapshot.feeds.iter().find(|f| f.feed_id == FeedId::new("ticks"));
    assert!(feed_metrics.map(|f| f.llm_requests_total).unwrap_or(0) == 0);
}
