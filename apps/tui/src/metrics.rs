//! HTTP client for the broker's `/api/v1/metrics` endpoint. The DTO shapes
//! here mirror `services/broker/src/http/admin.rs`'s `MetricsResponse`
//! field-for-field; this is the only other place that shape is described,
//! since `ts_metrics::Snapshot` itself isn't `Deserialize`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMetrics {
    pub feed_id: String,
    pub name: String,
    pub connected: bool,
    pub messages_total: u64,
    pub bytes_total: u64,
    pub message_rate_1s: f64,
    pub message_rate_10s: f64,
    pub message_rate_60s: f64,
    pub byte_rate_1s: f64,
    pub payload_size_p50: Option<u64>,
    pub payload_size_p95: Option<u64>,
    pub payload_size_p99: Option<u64>,
    pub parse_failures_total: u64,
    pub backpressure_drops_total: u64,
    pub context_item_count: usize,
    pub context_approx_bytes: usize,
    pub context_oldest_age_secs: f64,
    pub llm_requests_total: u64,
    pub llm_errors_total: u64,
    pub llm_input_tokens_total: u64,
    pub llm_output_tokens_total: u64,
    pub ttft_ms_p50: Option<u64>,
    pub ttft_ms_p95: Option<u64>,
    pub total_gen_ms_avg: Option<f64>,
    pub events_in_context_last: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub feeds: Vec<FeedMetrics>,
}

pub struct MetricsClient {
    http: reqwest::Client,
    url: String,
}

impl MetricsClient {
    pub fn new(broker_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/api/v1/metrics", broker_url.trim_end_matches('/')),
        }
    }

    pub async fn poll(&self) -> Result<MetricsResponse, reqwest::Error> {
        self.http.get(&self.url).send().await?.error_for_status()?.json().await
    }
}
