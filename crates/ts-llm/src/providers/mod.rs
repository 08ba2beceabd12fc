//! Concrete `Provider` implementations, one module per upstream wire
//! protocol (spec §4.3's required variant list).

pub mod anthropic;
pub mod azure_openai;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use azure_openai::AzureOpenAiProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;
