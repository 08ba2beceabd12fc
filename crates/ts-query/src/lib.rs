//! LLM Query Service (spec §4.7, component C7): assembles a grounding
//! prompt from a feed's Context Ring, selects a provider, and returns a
//! one-shot or streamed answer. Reports usage and timing back to
//! `ts-metrics`.

mod prompt;
mod registry;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use ts_catalog::Catalog;
use ts_context::ContextRing;
use ts_llm::{estimate_tokens, Message, ProviderError};
use ts_metrics::MetricsCollector;
use ts_protocol::FeedId;

pub use registry::ProviderRegistry;

const NO_DATA_ANSWER: &str =
    "No data is currently available for this feed. Please try again once events have arrived.";

/// One query against a feed's grounding context.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub feed_id: FeedId,
    pub question: String,
    pub provider: Option<String>,
    pub system_prompt_override: Option<String>,
}

/// Mirrors spec §7's error taxonomy, restricted to the kinds `StreamQuery`/
/// `Query` can themselves surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoProvidersAvailable,
    Cancelled,
    StreamTruncated,
    TransportError,
    ConfigError,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub provider_name: String,
    pub feed_id: FeedId,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub error_kind: Option<ErrorKind>,
}

fn classify(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::NotConfigured => ErrorKind::ConfigError,
        ProviderError::TransportError(_) | ProviderError::EmptyResponse => ErrorKind::TransportError,
        ProviderError::StreamTruncated => ErrorKind::StreamTruncated,
        ProviderError::Cancelled => ErrorKind::Cancelled,
    }
}

pub struct QueryService {
    context: Arc<ContextRing>,
    metrics: Arc<MetricsCollector>,
    catalog: Arc<dyn Catalog>,
    providers: ProviderRegistry,
}

impl QueryService {
    pub fn new(
        context: Arc<ContextRing>,
        metrics: Arc<MetricsCollector>,
        catalog: Arc<dyn Catalog>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            context,
            metrics,
            catalog,
            providers,
        }
    }

    /// Builds the grounding messages for `req`, or `None` if the feed's
    /// context is empty (spec §4.7 step 1 — callers return the canned
    /// "no data" answer in that case instead of calling this).
    async fn assemble(&self, req: &QueryRequest) -> Result<Option<(String, Vec<Message>, usize)>, ErrorKind> {
        let snapshot = self.context.snapshot(&req.feed_id).await;
        if snapshot.is_empty() {
            return Ok(None);
        }
        let events_in_context = snapshot.len();
        let feed = self
            .catalog
            .get_feed(&req.feed_id)
            .await
            .map_err(|_| ErrorKind::ConfigError)?;

        let system = prompt::build_system_prompt(
            &feed.name,
            req.system_prompt_override.as_deref(),
            feed.system_prompt.as_deref(),
        );
        let user = prompt::build_user_prompt(&snapshot, &req.question);
        let messages = vec![Message::system(system.clone()), Message::user(user.clone())];
        Ok(Some((format!("{system}\n{user}"), messages, events_in_context)))
    }

    /// One-shot query (spec §4.7 `Query`).
    pub async fn query(&self, req: QueryRequest, cancel: &CancellationToken) -> QueryResponse {
        let started = Instant::now();

        let assembled = match self.assemble(&req).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                return QueryResponse {
                    answer: NO_DATA_ANSWER.to_owned(),
                    provider_name: "none".to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_kind: None,
                };
            }
            Err(kind) => {
                return QueryResponse {
                    answer: String::new(),
                    provider_name: "none".to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_kind: Some(kind),
                };
            }
        };
        let (full_prompt, messages, events_in_context) = assembled;

        let Some(provider) = self.providers.select(req.provider.as_deref()) else {
            return QueryResponse {
                answer: String::new(),
                provider_name: "none".to_owned(),
                feed_id: req.feed_id,
                tokens_used: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error_kind: Some(ErrorKind::NoProvidersAvailable),
            };
        };

        let result = provider.chat(cancel, &messages).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(chat) => {
                let tokens_used = chat.total_tokens.unwrap_or_else(|| estimate_tokens(&full_prompt) + estimate_tokens(&chat.answer));
                self.metrics.record_llm_request(
                    &req.feed_id,
                    estimate_tokens(&full_prompt),
                    tokens_used.saturating_sub(estimate_tokens(&full_prompt)),
                    None,
                    duration_ms,
                    events_in_context,
                    false,
                );
                QueryResponse {
                    answer: chat.answer,
                    provider_name: provider.name().to_owned(),
                    feed_id: req.feed_id,
                    tokens_used,
                    duration_ms,
                    error_kind: None,
                }
            }
            Err(err) => {
                warn!(feed_id = %req.feed_id, provider = provider.name(), error = %err, "llm query failed");
                let kind = classify(&err);
                self.metrics.record_llm_request(&req.feed_id, estimate_tokens(&full_prompt), 0, None, duration_ms, events_in_context, true);
                QueryResponse {
                    answer: String::new(),
                    provider_name: provider.name().to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: 0,
                    duration_ms,
                    error_kind: Some(kind),
                }
            }
        }
    }

    /// Streaming query (spec §4.7 `StreamQuery`): token deltas are
    /// forwarded to `sink` as they arrive; TTFT and total generation time
    /// are captured and reported to `ts-metrics`; the final
    /// `QueryResponse` (with the full reconstructed answer) is returned on
    /// completion or cancellation.
    pub async fn stream_query(
        &self,
        req: QueryRequest,
        sink: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> QueryResponse {
        let started = Instant::now();

        let assembled = match self.assemble(&req).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                let _ = sink.send(NO_DATA_ANSWER.to_owned()).await;
                return QueryResponse {
                    answer: NO_DATA_ANSWER.to_owned(),
                    provider_name: "none".to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_kind: None,
                };
            }
            Err(kind) => {
                return QueryResponse {
                    answer: String::new(),
                    provider_name: "none".to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_kind: Some(kind),
                };
            }
        };
        let (full_prompt, messages, events_in_context) = assembled;

        let Some(provider) = self.providers.select(req.provider.as_deref()) else {
            return QueryResponse {
                answer: String::new(),
                provider_name: "none".to_owned(),
                feed_id: req.feed_id,
                tokens_used: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error_kind: Some(ErrorKind::NoProvidersAvailable),
            };
        };

        let (internal_tx, mut internal_rx) = mpsc::channel::<String>(128);
        let task_provider = provider.clone();
        let task_cancel = cancel.clone();
        let task_messages = messages;
        let handle = tokio::spawn(async move {
            task_provider.stream_chat(&task_cancel, &task_messages, internal_tx).await
        });

        let mut answer = String::new();
        let mut ttft_ms: Option<u64> = None;
        while let Some(token) = internal_rx.recv().await {
            if ttft_ms.is_none() {
                ttft_ms = Some(started.elapsed().as_millis() as u64);
            }
            answer.push_str(&token);
            if sink.send(token).await.is_err() {
                break;
            }
        }

        let stream_result = match handle.await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Cancelled),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let input_tokens = estimate_tokens(&full_prompt);

        match stream_result {
            Ok(result) => {
                let output_tokens = result.total_tokens.unwrap_or_else(|| estimate_tokens(&answer));
                self.metrics.record_llm_request(&req.feed_id, input_tokens, output_tokens, ttft_ms, duration_ms, events_in_context, false);
                QueryResponse {
                    answer,
                    provider_name: provider.name().to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: input_tokens + output_tokens,
                    duration_ms,
                    error_kind: None,
                }
            }
            Err(err) => {
                warn!(feed_id = %req.feed_id, provider = provider.name(), error = %err, "llm stream query failed");
                let kind = classify(&err);
                self.metrics.record_llm_request(&req.feed_id, input_tokens, estimate_tokens(&answer), ttft_ms, duration_ms, events_in_context, true);
                QueryResponse {
                    answer,
                    provider_name: provider.name().to_owned(),
                    feed_id: req.feed_id,
                    tokens_used: input_tokens,
                    duration_ms,
                    error_kind: Some(kind),
                }
            }
        }
    }
}
