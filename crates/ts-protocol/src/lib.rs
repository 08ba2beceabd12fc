//! ts-protocol: wire types shared across the TurboStream broker.
//!
//! This crate plays the role `rt-protocol` plays for the teacher workspace:
//! a dependency-light crate of `serde`-derived DTOs that every other crate
//! and service shares, so the wire shape is defined exactly once.
//!
//! It holds two families of types:
//!
//! - The **feed data model** (§3 of the spec): `FeedDefinition`, `FeedEvent`,
//!   and their nested configuration types. These are supplied by the
//!   external catalog collaborator and consumed by the Feed Connector.
//! - The **downstream session envelope** (§6): the JSON frames exchanged
//!   between the broker and a subscribed end-user session over WebSocket.
//!
//! # Glossary
//!
//! - **Feed** — a configured upstream real-time data source identified by
//!   [`FeedId`].
//! - **Session** — an authenticated end-user client connection to the
//!   broker, identified by [`SessionId`].
//! - **Context Ring** — the bounded newest-first buffer of recent events
//!   per feed used as LLM grounding (see `ts-context`).
//! - **Fan-out** — delivering one upstream event to the currently
//!   subscribed set of sessions (see `ts-dispatch`).
//! - **Backpressure drop** — deliberate discarding of an event because a
//!   bounded queue is full.
//! - **TTFT** — time-to-first-token, the elapsed time from an LLM request
//!   until the first token delta.
//! - **Linger** — the brief interval a feed's upstream connection is
//!   retained after losing its last subscriber, to avoid reconnect thrash.

mod envelope;
mod feed;

pub use envelope::{
    DownstreamFrame, FeedDataPayload, LlmQueryPayload, LlmResponsePayload, LlmTokenPayload,
    RegisterUserPayload, SubscribeFeedPayload, UnsubscribeFeedPayload,
};
pub use feed::{
    ConnectionType, DataFormat, FeedDefinition, FeedEvent, HttpMethod, HttpPollingConfig,
    KeyValue, ReceivedAt,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque unique identifier for a feed, supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedId(pub String);

impl FeedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for FeedId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque unique identifier for a subscriber session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
