//! TOML configuration.
//!
//! A single file (default `./config/legal.toml`) configures both the backend
//! service and the terminal client. Secrets can be left out of the file and
//! supplied through the environment instead:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `LEGAL_RAG_API_KEY` | `[auth].api_key` |
//! | `LEGAL_RAG_PASSWORD` | `[auth].app_password` |
//! | `LEGAL_API_URL` | `[client].api_url` |
//! | `LEGAL_API_KEY` | `[client].api_key` |
//!
//! `OPENAI_API_KEY` is read directly by the embedding and LLM providers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/legal.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Allowed browser origins. Empty means any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
            cors_origins: default_cors_origins(),
            session_ttl_secs: default_session_ttl_secs(),
            environment: default_environment(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_environment() -> String {
    "development".to_string()
}

/// Shared secrets. Both are required to run the server.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub app_password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_document: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,
    #[serde(default = "default_max_question_length")]
    pub max_question_length: usize,
    #[serde(default = "default_max_daily_queries")]
    pub max_daily_queries: i64,
    #[serde(default = "default_max_daily_cost")]
    pub max_daily_cost_usd: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
            max_pages_per_document: default_max_pages(),
            max_file_size_mb: default_max_file_size_mb(),
            max_question_length: default_max_question_length(),
            max_daily_queries: default_max_daily_queries(),
            max_daily_cost_usd: default_max_daily_cost(),
        }
    }
}

fn default_max_documents() -> usize {
    10
}
fn default_max_pages() -> usize {
    80
}
fn default_max_file_size_mb() -> usize {
    10
}
fn default_max_question_length() -> usize {
    500
}
fn default_max_daily_queries() -> i64 {
    100
}
fn default_max_daily_cost() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    600
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_relevance_score: default_min_relevance(),
        }
    }
}

fn default_top_k() -> usize {
    6
}
fn default_min_relevance() -> f64 {
    0.10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the OpenAI-compatible API (default `https://api.openai.com/v1`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_input_cost")]
    pub input_cost_per_1k: f64,
    #[serde(default = "default_output_cost")]
    pub output_cost_per_1k: f64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            input_cost_per_1k: default_input_cost(),
            output_cost_per_1k: default_output_cost(),
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.1
}
fn default_input_cost() -> f64 {
    0.00015
}
fn default_output_cost() -> f64 {
    0.0006
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Where the session token is persisted between runs. Defaults to
    /// `<config dir>/legal-rag/session.json`.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            session_file: None,
            timeout_secs: default_client_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000/api/v1".to_string()
}
fn default_client_timeout() -> u64 {
    120
}

impl ClientConfig {
    pub fn session_path(&self) -> PathBuf {
        self.session_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("legal-rag")
                .join("session.json")
        })
    }
}

impl Config {
    /// Configuration used when no file is present: every section at its
    /// defaults, then environment overrides applied.
    pub fn minimal() -> Self {
        let mut config = Self {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            client: ClientConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LEGAL_RAG_API_KEY") {
            self.auth.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LEGAL_RAG_PASSWORD") {
            self.auth.app_password = Some(v);
        }
        if let Ok(v) = std::env::var("LEGAL_API_URL") {
            self.client.api_url = v;
        }
        if let Ok(v) = std::env::var("LEGAL_API_KEY") {
            self.client.api_key = Some(v);
        }
    }

    /// Returns `(api_key, app_password)` or fails if the server cannot start
    /// without them.
    pub fn server_secrets(&self) -> Result<(String, String)> {
        let api_key = self
            .auth
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("auth.api_key (or LEGAL_RAG_API_KEY) must be set"))?;
        let password = self
            .auth
            .app_password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("auth.app_password (or LEGAL_RAG_PASSWORD) must be set")
            })?;
        Ok((api_key, password))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env();

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_relevance_score) {
        anyhow::bail!("retrieval.min_relevance_score must be in [0.0, 1.0]");
    }

    if config.limits.max_documents == 0 {
        anyhow::bail!("limits.max_documents must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if !config.server.api_prefix.is_empty() && !config.server.api_prefix.starts_with('/') {
        anyhow::bail!("server.api_prefix must start with '/'");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.api_prefix, "/api/v1");
        assert_eq!(cfg.limits.max_documents, 10);
        assert_eq!(cfg.limits.max_question_length, 500);
        assert_eq!(cfg.chunking.max_tokens, 600);
        assert_eq!(cfg.chunking.overlap_tokens, 100);
        assert_eq!(cfg.retrieval.top_k, 6);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_sections_override_defaults() {
        let file = write_config(
            r#"
[limits]
max_documents = 2
max_daily_queries = 5

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.limits.max_documents, 2);
        assert_eq!(cfg.limits.max_daily_queries, 5);
        assert_eq!(cfg.embedding.dims, Some(1536));
    }

    #[test]
    fn test_embedding_requires_dims() {
        let file = write_config(
            r#"
[embedding]
provider = "openai"
model = "text-embedding-3-small"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_embedding_provider() {
        let file = write_config(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic\"\ndims = 768\n",
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_unknown_llm_provider() {
        let file = write_config("[llm]\nprovider = \"anthropic\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let file = write_config("[chunking]\nmax_tokens = 50\noverlap_tokens = 50\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_server_secrets_required() {
        let mut cfg = Config::minimal();
        cfg.auth = AuthConfig::default();
        assert!(cfg.server_secrets().is_err());

        cfg.auth.api_key = Some("k".to_string());
        cfg.auth.app_password = Some("p".to_string());
        let (key, pw) = cfg.server_secrets().unwrap();
        assert_eq!(key, "k");
        assert_eq!(pw, "p");
    }
}
