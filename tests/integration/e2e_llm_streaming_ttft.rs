//! A streaming query against a feed with data measures time-to-first-token
//! from when the query started, forwards every token delta to the caller's
//! sink in order, and reports the reconstructed answer plus timing to
//! `ts-metrics` (spec §8, scenario 5; spec §4.7 `StreamQuery`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use ts_catalog::InMemoryCatalog;
use ts_context::ContextRing;
use ts_llm::{ChatResult, Message, Provider, ProviderError, StreamResult};
use ts_metrics::MetricsCollector;
use ts_protocol::{ConnectionType, DataFormat, FeedDefinition, FeedId};
use ts_query::{ProviderRegistry, QueryRequest, QueryService};

const FIRST_TOKEN_DELAY: Duration = Duration::from_millis(120);

/// Sleeps before emitting its first token, so a real TTFT gap is
/// observable, then streams two more tokens back to back.
struct SlowStartProvider;

#[async_trait]
impl Provider for SlowStartProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn chat(&self, _cancel: &CancellationToken, _messages: &[Message]) -> Result<ChatResult, ProviderError> {
        unimplemented!("this scenario only exercises stream_chat")
    }

    async fn stream_chat(
        &self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError> {
        tokio::time::sleep(FIRST_TOKEN_DELAY).await;
        sink.send("the ".to_owned()).await.ok();
        sink.send("price ".to_owned()).await.ok();
        sink.send("is rising".to_owned()).await.ok();
        Ok(StreamResult { total_tokens: Some(11) })
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
async fn stream_query_reports_ttft_and_forwards_tokens_in_order() {
    let context = Arc::new(ContextRing::new());
    let feed_id = FeedId::new("ticks");
    context.append(&feed_id, br#"{"price": 101.5}"#, DataFormat::Json).await;

    let metrics = Arc::new(MetricsCollector::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.put_feed(sample_feed());
    let providers = ProviderRegistry::new(vec![Arc::new(SlowStartProvider)]);
    let service = QueryService::new(context, metrics.clone(), catalog, providers);

    let (tx, mut rx) = mpsc::channel(8);
    let response = service
        .stream_query(
            QueryRequest {
                feed_id: feed_id.clone(),
                question: "What is the price doing?".to_owned(),
                provider: None,
                system_prompt_override: None,
            },
            tx,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(response.answer, "the price is rising");
    assert_eq!(rx.recv().await.unwrap(), "the ");
    assert_eq!(rx.recv().await.unwrap(), "price ");
    assert_eq!(rx.recv().await.unwrap(), "is rising");
    assert!(response.error_kind.is_none());
    assert!(response.duration_ms >= FIRST_TOKEN_DELAY.as_millis() as u64);

    let snapshot = metrics.get_metrics();
    let feed_metrics = snapshot.feeds.iter().find(|f| f.feed_id == feed_id).expect("feed metrics");
    assert_eq!(feed_metrics.llm_requests_total, 1);
    assert_eq!(feed_metrics.llm_errors_total, 0);
    let ttft_p50 = feed_metrics.ttft_ms_p50.expect("ttft sample recorded");
    assert!(ttft_p50 >= FIRST_TOKEN_DELAY.as_millis() as u64);
}
