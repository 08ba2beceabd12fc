//! Google Gemini: assistant turns use `role: "model"`, and the system
//! prompt is a top-level `systemInstruction` rather than a message-list
//! entry. Streaming uses `:streamGenerateContent?alt=sse`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{hoist_system, ChatResult, Message, Provider, ProviderError, Role, StreamResult};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant | Role::System => "model",
    }
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Request {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        }
    }

    fn contents(messages: &[&Message]) -> Vec<Content> {
        messages
            .iter()
            .map(|m| Content {
                role: role_str(m.role),
                parts: vec![Part { text: m.content.clone() }],
            })
            .collect()
    }

    fn build_request(&self, messages: &[Message]) -> Request {
        let (system, rest) = hoist_system(messages);
        Request {
            contents: Self::contents(&rest),
            system_instruction: system.map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
        }
    }

    fn url(&self, api_key: &str, streaming: bool) -> String {
        let method = if streaming {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        let sep = if streaming { "&" } else { "?" };
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:{}{}key={}",
            self.model, method, sep, api_key
        )
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
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
        let request = self.build_request(messages);
        let send = self
            .client
            .post(self.url(api_key, false))
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result?.error_for_status()?,
        };
        let body: Response = response.json().await?;
        let answer: String = body
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        let total_tokens = body
            .usage_metadata
            .map(|u| u.prompt_token_count + u.candidates_token_count);
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
        let request = self.build_request(messages);
        let send = self
            .client
            .post(self.url(api_key, true))
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
                let Ok(parsed): Result<Response, _> = serde_json::from_str(data) else {
                    continue;
                };
                if let Some(usage) = parsed.usage_metadata {
                    total_tokens = Some(usage.prompt_token_count + usage.candidates_token_count);
                }
                if let Some(candidate) = parsed.candidates.into_iter().next() {
                    for part in candidate.content.parts {
                        if !part.text.is_empty() {
                            got_any = true;
                            if sink.send(part.text).await.is_err() {
                                return Ok(StreamResult { total_tokens });
                            }
                        }
                    }
                }
            }
        }

        if !got_any {
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
        let provider = GeminiProvider::new(None, "gemini-1.5-flash");
        assert!(!provider.enabled());
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn hoists_system_into_system_instruction() {
        let provider = GeminiProvider::new(Some("key".to_owned()), "gemini-1.5-flash");
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let request = provider.build_request(&messages);
        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, "user");
    }
}
