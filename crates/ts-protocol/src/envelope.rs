//! The downstream session WebSocket frame format (spec §6).
//!
//! Every frame is a JSON object `{ "type": <kind>, "payload": <body> }`.
//! `registration-success` is the only kind with no `payload` field. This
//! is implemented as a hand-rolled `Serialize`/`Deserialize` pair rather
//! than `#[serde(tag = "type", content = "payload")]` so the wire shape
//! matches spec §6 byte-for-byte, including the absence of a `payload`
//! key on `registration-success` (adjacent tagging would emit one).
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserPayload {
    pub user_id: String,
    pub user_agent: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFeedPayload {
    pub feed_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeFeedPayload {
    pub feed_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDataPayload {
    pub feed_id: String,
    pub feed_name: String,
    pub event_name: String,
    pub data: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmQueryPayload {
    pub feed_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmTokenPayload {
    pub request_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponsePayload {
    pub request_id: String,
    pub answer: String,
    pub provider: String,
    pub duration_ms: u64,
}

/// One frame of the downstream session protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamFrame {
    RegisterUser(RegisterUserPayload),
    RegistrationSuccess,
    SubscribeFeed(SubscribeFeedPayload),
    UnsubscribeFeed(UnsubscribeFeedPayload),
    FeedData(FeedDataPayload),
    LlmQuery(LlmQueryPayload),
    LlmToken(LlmTokenPayload),
    LlmResponse(LlmResponsePayload),
}

impl DownstreamFrame {
    fn kind(&self) -> &'static str {
        match self {
            Self::RegisterUser(_) => "register-user",
            Self::RegistrationSuccess => "registration-success",
            Self::SubscribeFeed(_) => "subscribe-feed",
            Self::UnsubscribeFeed(_) => "unsubscribe-feed",
            Self::FeedData(_) => "feed-data",
            Self::LlmQuery(_) => "llm-query",
            Self::LlmToken(_) => "llm-token",
            Self::LlmResponse(_) => "llm-response",
        }
    }
}

impl Serialize for DownstreamFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let kind = self.kind();
        let payload = match self {
            Self::RegisterUser(p) => Some(serde_json::to_value(p)),
            Self::RegistrationSuccess => None,
            Self::SubscribeFeed(p) => Some(serde_json::to_value(p)),
            Self::UnsubscribeFeed(p) => Some(serde_json::to_value(p)),
            Self::FeedData(p) => Some(serde_json::to_value(p)),
            Self::LlmQuery(p) => Some(serde_json::to_value(p)),
            Self::LlmToken(p) => Some(serde_json::to_value(p)),
            Self::LlmResponse(p) => Some(serde_json::to_value(p)),
        };

        match payload {
            None => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", kind)?;
                map.end()
            }
            Some(Ok(value)) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", kind)?;
                map.serialize_entry("payload", &value)?;
                map.end()
            }
            Some(Err(e)) => Err(serde::ser::Error::custom(e)),
        }
    }
}

impl<'de> Deserialize<'de> for DownstreamFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            payload: Value,
        }

        let raw = Raw::deserialize(deserializer)?;
        let from_payload = |v: Value| serde_json::from_value(v).map_err(serde::de::Error::custom);

        match raw.kind.as_str() {
            "register-user" => Ok(Self::RegisterUser(from_payload(raw.payload)?)),
            "registration-success" => Ok(Self::RegistrationSuccess),
            "subscribe-feed" => Ok(Self::SubscribeFeed(from_payload(raw.payload)?)),
            "unsubscribe-feed" => Ok(Self::UnsubscribeFeed(from_payload(raw.payload)?)),
            "feed-data" => Ok(Self::FeedData(from_payload(raw.payload)?)),
            "llm-query" => Ok(Self::LlmQuery(from_payload(raw.payload)?)),
            "llm-token" => Ok(Self::LlmToken(from_payload(raw.payload)?)),
            "llm-response" => Ok(Self::LlmResponse(from_payload(raw.payload)?)),
            other => Err(serde::de::Error::custom(format!(
                "unknown downstream frame type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_success_has_no_payload_field() {
        let frame = DownstreamFrame::RegistrationSuccess;
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "registration-success" }));
    }

    #[test]
    fn feed_data_round_trips() {
        let frame = DownstreamFrame::FeedData(FeedDataPayload {
            feed_id: "f1".to_owned(),
            feed_name: "Ticks".to_owned(),
            event_name: String::new(),
            data: serde_json::json!({"price": 101.5}),
            timestamp: "2026-07-28T00:00:00Z".to_owned(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        let back: DownstreamFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<DownstreamFrame>(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown downstream frame type"));
    }

    #[test]
    fn subscribe_feed_matches_spec_shape() {
        let frame = DownstreamFrame::SubscribeFeed(SubscribeFeedPayload {
            feed_id: "f1".to_owned(),
            user_id: "u1".to_owned(),
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "subscribe-feed",
                "payload": { "feedId": "f1", "userId": "u1" }
            })
        );
    }
}
