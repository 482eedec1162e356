use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{QaError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub images: ImagesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Environment variable holding the bearer key; auth is off when unset
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Connection to the external chat service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_upstream_key_env")]
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_upstream_user")]
    pub user: String,
    #[serde(default)]
    pub base_city: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between two upstream lines
    #[serde(default = "default_upstream_idle_secs")]
    pub idle_timeout_secs: u64,
}

/// Selector routing, either from the JSON message config or inline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub table_path: Option<PathBuf>,
    #[serde(default)]
    pub channels: Vec<ChannelRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRoute {
    pub name: String,
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Emit an `error` fragment before `[DONE]` when the upstream run fails
    #[serde(default)]
    pub surface_errors: bool,
    /// Close a stream whose queue stays silent for this long
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    pub static_dir: PathBuf,
    pub base_url: String,
    pub cache_path: PathBuf,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_image_top_k")]
    pub top_k: usize,
}

/// OpenAI-compatible embedding endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Split Chinese text into space-separated words before embedding.
    /// Cached vectors are not recomputed when this changes.
    #[serde(default)]
    pub segment_words: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub triples_path: PathBuf,
    #[serde(default = "default_per_keyword_limit")]
    pub per_keyword_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_upstream_key_env() -> String {
    "DIFY_API_KEY".to_string()
}

fn default_upstream_user() -> String {
    "repair-qa".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_upstream_idle_secs() -> u64 {
    120
}

fn default_score_threshold() -> f32 {
    0.4
}

fn default_image_top_k() -> usize {
    2
}

fn default_embedding_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}

fn default_embedding_key_env() -> String {
    "DASHSCOPE_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-v4".to_string()
}

fn default_dimensions() -> usize {
    1024
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_per_keyword_limit() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key_env: None,
            api_key: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            api_key_env: default_embedding_key_env(),
            api_key: String::new(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
            segment_words: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl SystemConfig {
    /// Load, resolve secrets from the environment and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QaError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: SystemConfig = toml::from_str(content)?;
        config.resolve_secrets();
        config.validate()?;
        Ok(config)
    }

    fn resolve_secrets(&mut self) {
        match std::env::var(&self.upstream.api_key_env) {
            Ok(key) => self.upstream.api_key = key,
            Err(_) => warn!(
                env = %self.upstream.api_key_env,
                "Upstream API key not set, requests will be sent without a usable token"
            ),
        }

        match std::env::var(&self.embedding.api_key_env) {
            Ok(key) => self.embedding.api_key = key,
            Err(_) => warn!(env = %self.embedding.api_key_env, "Embedding API key not set"),
        }

        self.server.api_key = self
            .server
            .api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());
    }

    pub fn validate(&self) -> Result<()> {
        if !self.upstream.base_url.starts_with("http") {
            return Err(QaError::Config(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                self.upstream.base_url
            )));
        }

        if self.upstream.idle_timeout_secs == 0 {
            return Err(QaError::Config("upstream.idle_timeout_secs must be greater than 0".to_string()));
        }

        if self.stream.idle_timeout_secs == Some(0) {
            return Err(QaError::Config("stream.idle_timeout_secs must be greater than 0".to_string()));
        }

        if !(-1.0..=1.0).contains(&self.images.score_threshold) {
            return Err(QaError::Config(format!(
                "images.score_threshold must be within [-1, 1], got {}",
                self.images.score_threshold
            )));
        }

        if self.images.top_k == 0 {
            return Err(QaError::Config("images.top_k must be at least 1".to_string()));
        }

        if self.embedding.dimensions == 0 {
            return Err(QaError::Config("embedding.dimensions must be greater than 0".to_string()));
        }

        if self.knowledge.per_keyword_limit == 0 {
            return Err(QaError::Config("knowledge.per_keyword_limit must be at least 1".to_string()));
        }

        for route in &self.routing.channels {
            if route.name.trim().is_empty() {
                return Err(QaError::Config("routing.channels entries need a name".to_string()));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
