//! Azure OpenAI: deployment-scoped URL, `api-key` header instead of
//! `Authorization: Bearer`, and (per spec §4.3) streaming MAY be emulated
//! by delivering the full response as a single delta — Azure's own SSE
//! framing is identical to OpenAI's, but emulation keeps this provider
//! simple and is explicitly sanctioned by the spec.

use async_trait::async_trait;
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
struct Request {
    messages: Vec<WireMessage>,
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

pub struct AzureOpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    /// Full deployment URL including `?api-version=...`.
    deployment_url: String,
}

impl AzureOpenAiProvider {
    pub fn new(api_key: Option<String>, deployment_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            deployment_url: deployment_url.into(),
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
impl Provider for AzureOpenAiProvider {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && !self.deployment_url.is_empty()
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
            messages: Self::wire(messages),
        };
        let send = self
            .client
            .post(&self.deployment_url)
            .header("api-key", api_key)
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

    /// Emulated: the full response is delivered as a single delta (spec
    /// §4.3 explicitly allows this for Azure OpenAI).
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> Result<StreamResult, ProviderError> {
        let result = self.chat(cancel, messages).await?;
        let _ = sink.send(result.answer).await;
        Ok(StreamResult {
            total_tokens: result.total_tokens,
        })
    }
}
