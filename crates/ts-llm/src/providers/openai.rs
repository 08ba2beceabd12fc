//! OpenAI-compatible chat completions: `openai`, `mistral`, `grok` all
//! speak this exact wire shape against different base URLs, so one struct
//! serves all three (spec §4.3 lists them together as "OpenAI-compatible").
//! Grounded in the `usealtoal-edgelord` sibling's `adapter/llm/openai.rs`,
//! generalized from a fixed endpoint/model to a configurable `base_url`
//! and extended with SSE streaming, which the sibling's client lacks.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{ChatResult, Message, Provider, ProviderError, Role, StreamResult};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
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
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct Response {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// An OpenAI chat-completions-compatible provider.
pub struct OpenAiCompatibleProvider {
    name: &'static str,
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: &'static str,
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name,
            client: Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
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
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        self.name
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
        let request = Request {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: false,
        };
        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };
        let body: Response = response.json().await?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)?;
        Ok(ChatResult {
            answer,
            total_tokens: body.usage.map(|u| u.total_tokens),
        })
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
        let request = Request {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: true,
        };
        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };

        let mut stream = response.bytes_stream();
        let mut buf = String::new();
        let mut total_tokens = None;
        let mut saw_done = false;
        let mut got_any = false;

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
                if data == "[DONE]" {
                    saw_done = true;
                    continue;
                }
                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let parsed: StreamChunk = match serde_json::from_value(parsed) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(usage) = parsed.usage {
                    total_tokens = Some(usage.total_tokens);
                }
                if let Some(choice) = parsed.choices.into_iter().next() {
                    if let Some(token) = choice.delta.content {
                        if !token.is_empty() {
                            got_any = true;
                            if sink.send(token).await.is_err() {
                                return Ok(StreamResult { total_tokens });
                            }
                        }
                    }
                }
            }
        }

        if !saw_done && !got_any {
            return Err(ProviderError::StreamTruncated);
        }
        Ok(StreamResult { total_tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_api_key() {
        let provider = OpenAiCompatibleProvider::new(
            "openai",
            None,
            "gpt-4o-mini",
            "https://api.openai.com/v1/chat/completions",
        );
        assert!(!provider.enabled());
    }

    #[test]
    fn enabled_with_api_key_and_model() {
        let provider = OpenAiCompatibleProvider::new(
            "openai",
            Some("sk-test".to_owned()),
            "gpt-4o-mini",
            "https://api.openai.com/v1/chat/completions",
        );
        assert!(provider.enabled());
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn empty_api_key_is_treated_as_unconfigured() {
        let provider = OpenAiCompatibleProvider::new(
            "mistral",
            Some(String::new()),
            "mistral-large",
            "https://api.mistral.ai/v1/chat/completions",
        );
        assert!(!provider.enabled());
    }
}
