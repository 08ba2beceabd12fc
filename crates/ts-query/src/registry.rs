//! Provider selection (spec §4.7): an explicit, enabled provider request
//! wins; otherwise the first enabled provider in a fixed preference list.

use std::sync::Arc;

use ts_llm::Provider;

/// Fixed preference order, most-preferred first (spec §4.7, byte-exact
/// provider names).
const PREFERENCE_ORDER: &[&str] = &[
    "azure-openai",
    "openai",
    "anthropic",
    "gemini",
    "mistral",
    "grok",
    "ollama",
];

/// A closed set of configured providers.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Resolves which provider should serve a query. An explicit request
    /// for an enabled provider wins outright; otherwise (no request, or
    /// the requested provider is unknown/disabled) the first enabled
    /// provider in `PREFERENCE_ORDER` is used.
    pub fn select(&self, requested: Option<&str>) -> Option<Arc<dyn Provider>> {
        if let Some(name) = requested {
            if let Some(provider) = self.find(name) {
                if provider.enabled() {
                    return Some(provider.clone());
                }
            }
        }
        PREFERENCE_ORDER
            .iter()
            .find_map(|name| self.find(name).filter(|p| p.enabled()).cloned())
    }
}
