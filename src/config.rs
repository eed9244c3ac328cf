//! Environment-driven configuration.
//!
//! `.env` is loaded first (silently ignored when missing); every value can be
//! overridden by a real environment variable. Only the language-model
//! credential is mandatory.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedding::OpenAiEmbedder;
use crate::llm::openai::OpenAiConfig;
use crate::llm::Provider;
use crate::rag::RetrievalSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set. Add it to your environment or .env file.")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown LLM_PROVIDER {0:?} (expected deepseek, openai, claude or ollama)")]
    UnknownProvider(String),
}

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    DeepSeek,
    OpenAi,
    Claude,
    Ollama,
}

impl ProviderKind {
    /// Environment variable holding the credential, if the provider needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Claude => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Claude => "claude-sonnet-4-20250514",
            ProviderKind::Ollama => "llama3",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "openai" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub ollama_host: String,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl LlmConfig {
    pub fn provider(&self) -> Provider {
        let provider = match self.provider {
            ProviderKind::DeepSeek => Provider::deepseek(self.api_key.clone()),
            ProviderKind::OpenAi => Provider::openai(self.api_key.clone()),
            ProviderKind::Claude => Provider::claude(self.api_key.clone()),
            ProviderKind::Ollama => Provider::ollama(self.ollama_host.clone()),
        };
        match &self.base_url {
            Some(url) => provider.with_base_url(url.clone()),
            None => provider,
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

impl EmbeddingConfig {
    pub fn embedder(&self) -> OpenAiEmbedder {
        let config = OpenAiConfig {
            api_key: self.api_key.clone().unwrap_or_default(),
            base_url: self.base_url.clone(),
        };
        OpenAiEmbedder::new(config, self.model.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are dropped.
    pub session_idle: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalSettings,
}

/// Typed access to a key/value source.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn opt(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.opt(key)
            .map(|value| value.parse().map_err(|_| ConfigError::Invalid { key, value }))
            .transpose()
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}

impl AppConfig {
    /// Build config from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let provider = match vars.opt("LLM_PROVIDER") {
            Some(name) => name.parse()?,
            None => ProviderKind::DeepSeek,
        };
        let api_key = match provider.api_key_var() {
            Some(key) => vars.opt(key).ok_or(ConfigError::Missing(key))?,
            None => String::new(),
        };
        let llm = LlmConfig {
            provider,
            api_key,
            model: vars.or("LLM_MODEL", provider.default_model()),
            base_url: vars.opt("LLM_BASE_URL"),
            ollama_host: vars.or("OLLAMA_HOST", "http://localhost:11434"),
        };

        let embedding = EmbeddingConfig {
            base_url: vars.or("EMBEDDING_BASE_URL", "http://localhost:11434/v1"),
            api_key: vars.opt("EMBEDDING_API_KEY"),
            model: vars.or("EMBEDDING_MODEL", "all-minilm"),
        };

        let max_upload_mb: usize = vars.parse_or("MAX_UPLOAD_MB", 200)?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                key: "MAX_UPLOAD_MB",
                value: max_upload_mb.to_string(),
            })?;
        let idle_minutes: u64 = vars.parse_or("SESSION_IDLE_MINUTES", 60)?;
        if idle_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_IDLE_MINUTES",
                value: idle_minutes.to_string(),
            });
        }
        let server = ServerConfig {
            host: vars.or("HOST", "127.0.0.1"),
            port: vars.parse_or("PORT", 8501)?,
            upload_dir: PathBuf::from(vars.or("UPLOAD_DIR", "temp_files")),
            max_upload_bytes,
            session_idle: Duration::from_secs(idle_minutes.saturating_mul(60)),
        };

        let defaults = RetrievalSettings::default();
        let retrieval = RetrievalSettings {
            top_k: vars.parse_or("RAG_TOP_K", defaults.top_k)?,
            min_score: vars.parse("RAG_MIN_SCORE")?,
            history_turns: vars.parse_or("RAG_HISTORY_TURNS", defaults.history_turns)?,
        };

        Ok(Self {
            server,
            llm,
            embedding,
            retrieval,
        })
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:    {}:{}, uploads in {}", self.server.host, self.server.port, self.server.upload_dir.display());
        tracing::info!("  sessions:  expire after {}s idle", self.server.session_idle.as_secs());
        tracing::info!("  llm:       provider={}, model={}", self.llm.provider, self.llm.model);
        tracing::info!("  embedding: url={}, model={}", self.embedding.base_url, self.embedding.model);
        tracing::info!(
            "  retrieval: top_k={}, min_score={:?}, history_turns={}",
            self.retrieval.top_k,
            self.retrieval.min_score,
            self.retrieval.history_turns
        );
    }
}
