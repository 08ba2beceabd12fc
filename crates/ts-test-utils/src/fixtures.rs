//! Builders for the two core DTOs, with sane defaults so individual tests
//! only override the fields they care about.

use ts_protocol::{ConnectionType, DataFormat, FeedDefinition, FeedEvent, FeedId};

pub fn feed_definition(feed_id: &str, connection_type: ConnectionType, url: &str) -> FeedDefinition {
    FeedDefinition {
        feed_id: FeedId::new(feed_id),
        name: format!("{feed_id}-name"),
        category: "test".to_owned(),
        connection_type,
        url: url.to_owned(),
        query_params: vec![],
        headers: vec![],
        connection_messages: vec![],
        event_name: String::new(),
        data_format: DataFormat::Json,
        protobuf_type: None,
        reconnection_enabled: true,
        reconnection_delay_ms: 100,
        reconnection_attempts: 0,
        http_polling_config: None,
        system_prompt: None,
        default_ai_prompt: None,
        ai_analysis_enabled: true,
    }
}

pub fn feed_event(feed_id: &str, payload: &[u8]) -> FeedEvent {
    FeedEvent::new(FeedId::new(feed_id), format!("{feed_id}-name"), "", payload.to_vec())
}
