//! Local Ollama: newline-delimited JSON streaming (no SSE framing), no
//! API key — presence of a configured model is what "enabled" means here,
//! per spec §6 ("absence means disabled").

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
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
struct Chunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    fn wire(messages: &[Message]) -> Vec<WireMessage> {
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
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn enabled(&self) -> bool {
        !self.model.is_empty()
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
    ) -> Result<ChatResult, ProviderError> {
        if !self.enabled() {
            return Err(ProviderError::NotConfigured);
        }
        let request = Request {
            model: &self.model,
            messages: Self::wire(messages),
            stream: false,
        };
        let send = self.client.post(&self.base_url).json(&request).send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };
        let body: Chunk = response.json().await?;
        let answer = body.message.map(|m| m.content).unwrap_or_default();
        if answer.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        let total = body.prompt_eval_count + body.eval_count;
        Ok(ChatResult {
            answer,
            total_tokens: if total == 0 { None } else { Some(total) },
        })
    }

    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError> {
        if !self.enabled() {
            return Err(ProviderError::NotConfigured);
        }
        let request = Request {
            model: &self.model,
            messages: Self::wire(messages),
            stream: true,
        };
        let send = self.client.post(&self.base_url).json(&request).send();

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
                let line = buf[..pos].trim().to_owned();
                buf.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                let Ok(parsed): Result<Chunk, _> = serde_json::from_str(&line) else {
                    continue;
                };
                if let Some(message) = parsed.message {
                    if !message.content.is_empty() {
                        got_any = true;
                        if sink.send(message.content).await.is_err() {
                            return Ok(StreamResult { total_tokens });
                        }
                    }
                }
                if parsed.done {
                    saw_done = true;
                    let total = parsed.prompt_eval_count + parsed.eval_count;
                    if total > 0 {
                        total_tokens = Some(total);
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
    fn disabled_without_model() {
        let provider = OllamaProvider::new("", "http://localhost:11434/api/chat");
        assert!(!provider.enabled());
    }

    #[test]
    fn enabled_with_model_and_no_api_key_required() {
        let provider = OllamaProvider::new("llama3", "http://localhost:11434/api/chat");
        assert!(provider.enabled());
        assert_eq!(provider.name(), "ollama");
    }
}
