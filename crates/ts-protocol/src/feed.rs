//! The feed data model (spec §3): `FeedDefinition` and `FeedEvent`.
//!
//! `FeedDefinition` is immutable from the core's perspective — it is
//! supplied by the catalog collaborator (`ts-catalog`) and cached by the
//! Feed Connector. `FeedEvent` is the normalized unit the Feed Connector
//! produces for every upstream frame it parses.

use crate::FeedId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered key/value pair, used for query params and headers where
/// order matters (some upstreams are sensitive to header ordering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// How the Feed Connector should dial an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    Websocket,
    Socketio,
    HttpPolling,
}

/// The wire format of an upstream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    Text,
    Protobuf,
}

/// HTTP method for `http-polling` feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// Configuration for `http-polling` feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPollingConfig {
    pub method: HttpMethod,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub request_headers: Vec<KeyValue>,
    #[serde(default, with = "crate::feed::opt_base64")]
    pub request_body: Option<Vec<u8>>,
    pub response_format: DataFormat,
    /// JSON pointer (RFC 6901) into the response body, e.g. `/data/items`.
    /// When set and it resolves to an array, each element is emitted as
    /// its own event; when it resolves to a single object, that object is
    /// emitted as one event (spec §9 Open Question — see DESIGN.md).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
}

mod opt_base64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => {
                s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Immutable (from the core's perspective) definition of one feed, as
/// supplied by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDefinition {
    pub feed_id: FeedId,
    pub name: String,
    pub category: String,
    pub connection_type: ConnectionType,
    pub url: String,
    #[serde(default)]
    pub query_params: Vec<KeyValue>,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    /// Bytestrings sent immediately after upstream connect, in order.
    #[serde(default, with = "base64_vec")]
    pub connection_messages: Vec<Vec<u8>>,
    /// For Socket.IO, which event name to extract. Ignored for raw WebSocket.
    #[serde(default)]
    pub event_name: String,
    pub data_format: DataFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protobuf_type: Option<String>,
    pub reconnection_enabled: bool,
    pub reconnection_delay_ms: u64,
    /// 0 = unbounded.
    pub reconnection_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_polling_config: Option<HttpPollingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ai_prompt: Option<String>,
    pub ai_analysis_enabled: bool,
}

mod base64_vec {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = value
            .iter()
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
            .collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(d)?;
        raw.into_iter()
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// When an event was received: a monotonic instant (for staleness /
/// interval math, never serialized) paired with a wall-clock timestamp
/// (for display and grounding, always serialized).
#[derive(Debug, Clone, Copy)]
pub struct ReceivedAt {
    pub monotonic: std::time::Instant,
    pub wall: DateTime<Utc>,
}

impl ReceivedAt {
    pub fn now() -> Self {
        Self {
            monotonic: std::time::Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// The normalized unit the Feed Connector produces for every parsed
/// upstream frame (spec §3).
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub feed_id: FeedId,
    pub feed_name: String,
    /// May be empty (e.g. raw WebSocket feeds with no Socket.IO event name).
    pub event_name: String,
    pub payload: Vec<u8>,
    pub received_at: ReceivedAt,
}

impl FeedEvent {
    pub fn new(
        feed_id: FeedId,
        feed_name: impl Into<String>,
        event_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            feed_id,
            feed_name: feed_name.into(),
            event_name: event_name.into(),
            payload,
            received_at: ReceivedAt::now(),
        }
    }
}
