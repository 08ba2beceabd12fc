//! Anthropic Claude: system messages are hoisted to a top-level `system`
//! field, and streaming uses `content_block_delta` SSE events rather than
//! OpenAI's `delta.content`. Grounded in `usealtoal-edgelord`'s
//! `core/llm/anthropic.rs`, extended with streaming and cancellation.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{hoist_system, ChatResult, Message, Provider, ProviderError, Role, StreamResult};

const API_VERSION: &str = "2023-06-01";

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant | Role::System => "assistant",
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct Response {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    max_tokens: u64,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, model: impl Into<String>, max_tokens: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            max_tokens,
            base_url: "https://api.anthropic.com/v1/messages".to_owned(),
        }
    }

    fn wire(messages: &[&Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && !self.model.is_empty()
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
    ) -> Result<ChatResult, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::NotConfigured);
        };
        let (system, rest) = hoist_system(messages);
        let request = Request {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: Self::wire(&rest),
            stream: false,
        };
        let send = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };
        let body: Response = response.json().await?;
        let answer: String = body.content.into_iter().map(|b| b.text).collect();
        if answer.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        let total_tokens = body.usage.map(|u| u.input_tokens + u.output_tokens);
        Ok(ChatResult { answer, total_tokens })
    }

    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::NotConfigured);
        };
        let (system, rest) = hoist_system(messages);
        let request = Request {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: Self::wire(&rest),
            stream: true,
        };
        let send = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };

        let mut stream = response.bytes_stream();
        let mut buf = String::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut got_any = false;
        let mut saw_stop = false;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_owned();
                buf.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(event): Result<Value, _> = serde_json::from_str(data) else {
                    continue;
                };
                match event.get("type").and_then(Value::as_str) {
                    Some("content_block_delta") => {
                        if let Some(token) = event
                            .pointer("/delta/text")
                            .and_then(Value::as_str)
                        {
                            if !token.is_empty() {
                                got_any = true;
                                if sink.send(token.to_owned()).await.is_err() {
                                    return Ok(StreamResult {
                                        total_tokens: Some(input_tokens + output_tokens),
                                    });
                                }
                            }
                        }
                    }
                    Some("message_start") => {
                        if let Some(tokens) = event.pointer("/message/usage/input_tokens").and_then(Value::as_u64) {
                            input_tokens = tokens;
                        }
                    }
                    Some("message_delta") => {
                        if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                            output_tokens = tokens;
                        }
                    }
                    Some("message_stop") => saw_stop = true,
                    _ => {}
                }
            }
        }

        if !saw_stop && !got_any {
            return Err(ProviderError::StreamTruncated);
        }
        Ok(StreamResult {
            total_tokens: Some(input_tokens + output_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_api_key() {
        let provider = AnthropicProvider::new(None, "claude-3-5-sonnet", 4096);
        assert!(!provider.enabled());
        assert_eq!(provider.name(), "anthropic");
    }
}
