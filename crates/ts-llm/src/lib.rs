//! ts-llm: the LLM Provider Abstraction (spec §4.3, component C3).
//!
//! A uniform non-streaming/streaming chat contract across heterogeneous
//! provider wire protocols. `Provider` is an `async_trait` object-safe
//! trait so `ts-query` can hold a closed registry of `Arc<dyn Provider>` —
//! the teacher has no async trait objects of its own (its WS fan-out is
//! concrete types throughout), so this follows the `usealtoal-edgelord`
//! sibling's `Llm`/`MarketDataStream` trait-object pattern instead
//! (`port/outbound/llm.rs`, `core/exchange/reconnecting.rs`).

pub mod providers;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One message in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Result of a non-streaming `chat` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub answer: String,
    /// `None` when the provider didn't report usage; the caller estimates.
    pub total_tokens: Option<u64>,
}

/// Result of a `stream_chat` call (token deltas were already written to
/// the sink; this carries only what the sink can't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamResult {
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider not configured")]
    NotConfigured,
    #[error("transport error: {0}")]
    TransportError(#[from] reqwest::Error),
    #[error("provider returned no content")]
    EmptyResponse,
    #[error("provider stream ended mid-event")]
    StreamTruncated,
    #[error("cancelled")]
    Cancelled,
}

/// Uniform chat contract across LLM providers (spec §4.3).
///
/// Providers whose native protocol separates a top-level system
/// instruction from the message list (Anthropic, Gemini) hoist `system`
/// messages out of `messages` and concatenate them, in order, into that
/// slot; they never appear in the provider's own `messages` array.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, matched against the fixed preference list in
    /// `ts-query` and against an explicit per-query provider request.
    fn name(&self) -> &'static str;

    /// `true` iff configuration (credentials, model) is present and
    /// non-empty.
    fn enabled(&self) -> bool;

    /// Non-streaming chat completion.
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
    ) -> Result<ChatResult, ProviderError>;

    /// Streaming chat completion. Token deltas are written to `sink` as
    /// they arrive; `sink` is dropped (closing the channel) on return,
    /// whether that return is success, error, or cancellation.
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError>;
}

/// Hoists `Role::System` messages out of `messages`, concatenating their
/// content in order (joined by a single newline), and returns the
/// remaining non-system messages. Used by providers with a dedicated
/// top-level system slot (Anthropic, Gemini).
pub(crate) fn hoist_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for m in messages {
        match m.role {
            Role::System => system_parts.push(m.content.as_str()),
            _ => rest.push(m),
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, rest)
}

/// `(prompt byte length) / 4`, used when a provider omits usage and no
/// better estimate is available (spec §4.7).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoist_system_concatenates_in_order() {
        let messages = vec![
            Message::system("first"),
            Message::user("hi"),
            Message::system("second"),
        ];
        let (system, rest) = hoist_system(&messages);
        assert_eq!(system, Some("first\nsecond".to_owned()));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "hi");
    }

    #[test]
    fn hoist_system_with_no_system_messages_is_none() {
        let messages = vec![Message::user("hi")];
        let (system, rest) = hoist_system(&messages);
        assert_eq!(system, None);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn estimate_tokens_divides_by_four_with_floor_of_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(40)), 10);
    }
}
