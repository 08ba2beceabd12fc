//! Broker configuration loading (spec §6's tunables, plus the feed and
//! provider credential tables a running broker needs). TOML is the sole
//! config source besides `BIND_ADDR`/`LOG_LEVEL` env overrides, the same
//! split the teacher uses between `forwarder`'s TOML config
//! (`services/forwarder/src/config.rs`) and `server`'s env-only bind
//! address (`services/server/src/main.rs`).
//!
//! The persistent feed/subscription catalog is explicitly out of scope
//! for the core (spec §1 Non-goals; see `ts-catalog`'s doc comment) — the
//! `[[feeds]]` table here exists only to seed the in-process
//! `InMemoryCatalog` this binary runs against. A deployment with a real
//! catalog backend would not need this section at all.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use ts_connector::ConnectorConfig;
use ts_protocol::FeedDefinition;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bind: String,
    pub tunables: Tunables,
    pub feeds: Vec<FeedDefinition>,
    pub providers: ProviderCredentials,
}

#[derive(Debug, Clone)]
pub struct Tunables {
    pub n_ctx: usize,
    pub q_in: usize,
    pub q_out: usize,
    pub n_drop_kill: u32,
    pub connector: ConnectorConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyModelCreds {
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnthropicCreds {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AzureOpenAiCreds {
    pub api_key: Option<String>,
    pub deployment_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct OllamaCreds {
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub azure_openai: Option<AzureOpenAiCreds>,
    pub openai: Option<ApiKeyModelCreds>,
    pub anthropic: Option<AnthropicCreds>,
    pub gemini: Option<ApiKeyModelCreds>,
    pub mistral: Option<ApiKeyModelCreds>,
    pub grok: Option<ApiKeyModelCreds>,
    pub ollama: Option<OllamaCreds>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (Option everywhere optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    bind: Option<String>,
    tunables: Option<RawTunables>,
    #[serde(default)]
    feeds: Vec<FeedDefinition>,
    providers: Option<RawProviders>,
}

#[derive(Debug, Deserialize)]
struct RawTunables {
    n_ctx: Option<usize>,
    q_in: Option<usize>,
    q_out: Option<usize>,
    n_drop_kill: Option<u32>,
    t_stale_secs: Option<u64>,
    t_linger_secs: Option<u64>,
    t_ping_secs: Option<u64>,
    d_base_secs: Option<u64>,
    d_max_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawProviders {
    azure_openai: Option<RawAzureOpenAi>,
    openai: Option<RawApiKeyModel>,
    anthropic: Option<RawAnthropic>,
    gemini: Option<RawApiKeyModel>,
    mistral: Option<RawApiKeyModel>,
    grok: Option<RawApiKeyModel>,
    ollama: Option<RawOllama>,
}

#[derive(Debug, Deserialize)]
struct RawApiKeyModel {
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAnthropic {
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawAzureOpenAi {
    api_key: Option<String>,
    deployment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOllama {
    model: Option<String>,
    base_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<BrokerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/turbostream/broker.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<BrokerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw.schema_version.unwrap_or(1);
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!("schema_version must be 1, got {schema_version}")));
    }

    let bind = raw.bind.unwrap_or_else(|| "0.0.0.0:8090".to_owned());

    let default = ConnectorConfig::default();
    let tunables = match raw.tunables {
        Some(t) => Tunables {
            n_ctx: t.n_ctx.unwrap_or(100),
            q_in: t.q_in.unwrap_or(1024),
            q_out: t.q_out.unwrap_or(256),
            n_drop_kill: t.n_drop_kill.unwrap_or(1024),
            connector: ConnectorConfig {
                t_stale: t.t_stale_secs.map_or(default.t_stale, Duration::from_secs),
                t_linger: t.t_linger_secs.map_or(default.t_linger, Duration::from_secs),
                t_ping: t.t_ping_secs.map_or(default.t_ping, Duration::from_secs),
                d_base: t.d_base_secs.map_or(default.d_base, Duration::from_secs),
                d_max: t.d_max_secs.map_or(default.d_max, Duration::from_secs),
                connect_timeout: t.connect_timeout_secs.map_or(default.connect_timeout, Duration::from_secs),
            },
        },
        None => Tunables {
            n_ctx: 100,
            q_in: 1024,
            q_out: 256,
            n_drop_kill: 1024,
            connector: default,
        },
    };

    let providers = match raw.providers {
        Some(p) => ProviderCredentials {
            azure_openai: p.azure_openai.map(|a| AzureOpenAiCreds {
                api_key: a.api_key,
                deployment_url: a.deployment_url.unwrap_or_default(),
            }),
            openai: p.openai.map(|a| ApiKeyModelCreds {
                api_key: a.api_key,
                model: a.model.unwrap_or_default(),
            }),
            anthropic: p.anthropic.map(|a| AnthropicCreds {
                api_key: a.api_key,
                model: a.model.unwrap_or_default(),
                max_tokens: a.max_tokens.unwrap_or(1024),
            }),
            gemini: p.gemini.map(|a| ApiKeyModelCreds {
                api_key: a.api_key,
                model: a.model.unwrap_or_default(),
            }),
            mistral: p.mistral.map(|a| ApiKeyModelCreds {
                api_key: a.api_key,
                model: a.model.unwrap_or_default(),
            }),
            grok: p.grok.map(|a| ApiKeyModelCreds {
                api_key: a.api_key,
                model: a.model.unwrap_or_default(),
            }),
            ollama: p.ollama.map(|a| OllamaCreds {
                model: a.model.unwrap_or_default(),
                base_url: a.base_url.unwrap_or_else(|| "http://localhost:11434/api/chat".to_owned()),
            }),
        },
        None => ProviderCredentials::default(),
    };

    Ok(BrokerConfig {
        bind,
        tunables,
        feeds: raw.feeds,
        providers,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_every_default() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8090");
        assert_eq!(cfg.tunables.n_ctx, 100);
        assert_eq!(cfg.tunables.q_out, 256);
        assert!(cfg.feeds.is_empty());
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = load_config_from_str("schema_version = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn parses_tunables_and_a_feed() {
        let toml_str = r#"
            bind = "127.0.0.1:9000"

            [tunables]
            n_ctx = 50
            t_linger_secs = 15

            [[feeds]]
            feed_id = "f1"
            name = "Ticks"
            category = "markets"
            connection_type = "websocket"
            url = "wss://example.com/stream"
            data_format = "json"
            reconnection_enabled = true
            reconnection_delay_ms = 1000
            reconnection_attempts = 0
            ai_analysis_enabled = true

            [providers.openai]
            api_key = "sk-test"
            model = "gpt-4o-mini"
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.tunables.n_ctx, 50);
        assert_eq!(cfg.tunables.connector.t_linger, Duration::from_secs(15));
        assert_eq!(cfg.feeds.len(), 1);
        assert_eq!(cfg.feeds[0].name, "Ticks");
        let openai = cfg.providers.openai.unwrap();
        assert_eq!(openai.model, "gpt-4o-mini");
    }
}
