//! Renders `ts_metrics::Snapshot` as JSON for operators and the TUI's
//! non-interactive sibling consumers, grounded in the teacher's
//! `http::metrics::get_metrics` handler shape (`services/server/src/http/
//! metrics.rs`), adapted from a single stream's DB row to an in-memory
//! per-feed snapshot.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct FeedMetrics {
    feed_id: String,
    name: String,
    connected: bool,
    messages_total: u64,
    bytes_total: u64,
    message_rate_1s: f64,
    message_rate_10s: f64,
    message_rate_60s: f64,
    byte_rate_1s: f64,
    payload_size_p50: Option<u64>,
    payload_size_p95: Option<u64>,
    payload_size_p99: Option<u64>,
    parse_failures_total: u64,
    backpressure_drops_total: u64,
    context_item_count: usize,
    context_approx_bytes: usize,
    context_oldest_age_secs: f64,
    llm_requests_total: u64,
    llm_errors_total: u64,
    llm_input_tokens_total: u64,
    llm_output_tokens_total: u64,
    ttft_ms_p50: Option<u64>,
    ttft_ms_p95: Option<u64>,
    total_gen_ms_avg: Option<f64>,
    events_in_context_last: usize,
}

#[derive(Serialize)]
struct MetricsResponse {
    feeds: Vec<FeedMetrics>,
}

pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics().get_metrics();
    let feeds = snapshot
        .feeds
        .into_iter()
        .map(|f| FeedMetrics {
            feed_id: f.feed_id.as_str().to_owned(),
            name: f.name,
            connected: f.connected,
            messages_total: f.messages_total,
            bytes_total: f.bytes_total,
            message_rate_1s: f.message_rate_1s,
            message_rate_10s: f.message_rate_10s,
            message_rate_60s: f.message_rate_60s,
            byte_rate_1s: f.byte_rate_1s,
            payload_size_p50: f.payload_size_p50,
            payload_size_p95: f.payload_size_p95,
            payload_size_p99: f.payload_size_p99,
            parse_failures_total: f.parse_failures_total,
            backpressure_drops_total: f.backpressure_drops_total,
            context_item_count: f.context_item_count,
            context_approx_bytes: f.context_approx_bytes,
            context_oldest_age_secs: f.context_oldest_age_secs,
            llm_requests_total: f.llm_requests_total,
            llm_errors_total: f.llm_errors_total,
            llm_input_tokens_total: f.llm_input_tokens_total,
            llm_output_tokens_total: f.llm_output_tokens_total,
            ttft_ms_p50: f.ttft_ms_p50,
            ttft_ms_p95: f.ttft_ms_p95,
            total_gen_ms_avg: f.total_gen_ms_avg,
            events_in_context_last: f.events_in_context_last,
        })
        .collect();
    Json(MetricsResponse { feeds })
}
