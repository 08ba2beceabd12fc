//! Builds the closed `ProviderRegistry` (spec §4.3/§9: "a tagged-variant
//! or capability-based abstraction ... with a closed provider registry
//! initialized at startup") from configured credentials. A provider with
//! no credentials is still constructed — its `enabled()` simply reports
//! `false` — so the preference-order fallback in `ts_query::ProviderRegistry`
//! can skip over it uniformly.

use std::sync::Arc;

use ts_llm::providers::{AnthropicProvider, AzureOpenAiProvider, GeminiProvider, OllamaProvider, OpenAiCompatibleProvider};
use ts_llm::Provider;
use ts_query::ProviderRegistry;

use crate::config::ProviderCredentials;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const MISTRAL_URL: &str = "https://api.mistral.ai/v1/chat/completions";
const GROK_URL: &str = "https://api.x.ai/v1/chat/completions";

pub fn build_registry(creds: &ProviderCredentials) -> ProviderRegistry {
    let azure = creds.azure_openai.clone().unwrap_or_default();
    let openai = creds.openai.clone().unwrap_or_default();
    let anthropic = creds.anthropic.clone().unwrap_or_default();
    let gemini = creds.gemini.clone().unwrap_or_default();
    let mistral = creds.mistral.clone().unwrap_or_default();
    let grok = creds.grok.clone().unwrap_or_default();
    let ollama = creds.ollama.clone().unwrap_or_default();

    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(AzureOpenAiProvider::new(azure.api_key, azure.deployment_url)),
        Arc::new(OpenAiCompatibleProvider::new("openai", openai.api_key, openai.model, OPENAI_URL)),
        Arc::new(AnthropicProvider::new(anthropic.api_key, anthropic.model, anthropic.max_tokens)),
        Arc::new(GeminiProvider::new(gemini.api_key, gemini.model)),
        Arc::new(OpenAiCompatibleProvider::new("mistral", mistral.api_key, mistral.model, MISTRAL_URL)),
        Arc::new(OpenAiCompatibleProvider::new("grok", grok.api_key, grok.model, GROK_URL)),
        Arc::new(OllamaProvider::new(ollama.model, ollama.base_url)),
    ];
    ProviderRegistry::new(providers)
}
