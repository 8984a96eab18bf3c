//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration. [`load_config`] parses and validates.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/mmi.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_name")]
    pub name: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
        }
    }
}

fn default_collection_name() -> String {
    "multimodal_collection".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    250
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    /// Minimum duration of a grouped transcript segment, in seconds.
    #[serde(default = "default_segment_secs")]
    pub segment_secs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            segment_secs: default_segment_secs(),
        }
    }
}

fn default_segment_secs() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed CLIP), `hash`, or `disabled`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Model cache directory; fastembed's default when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Refuse to download model files.
    #[serde(default = "default_true")]
    pub offline: bool,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            cache_dir: None,
            offline: true,
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "clip-vit-b-32".to_string()
}
fn default_true() -> bool {
    true
}
fn default_embedding_batch_size() -> usize {
    32
}
fn default_embedding_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    /// `whisper-http` or `disabled`.
    #[serde(default = "default_transcription_provider")]
    pub provider: String,
    /// Base URL of an OpenAI-compatible server, e.g. `http://localhost:9000`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// Environment variable holding the bearer token. Unset variable means no auth.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            url: None,
            model: default_transcription_model(),
            api_key_env: default_api_key_env(),
            language: None,
            timeout_secs: default_transcription_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_transcription_provider() -> String {
    "disabled".to_string()
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_transcription_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Units per store write.
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_index_batch_size() -> usize {
    100
}
fn default_initial_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

fn default_k() -> usize {
    10
}
fn default_max_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.collection.name.trim().is_empty() {
        anyhow::bail!("collection.name must not be empty");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    if !config.audio.segment_secs.is_finite() || config.audio.segment_secs <= 0.0 {
        anyhow::bail!("audio.segment_secs must be a positive number");
    }

    match config.embedding.provider.as_str() {
        "local" | "hash" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, hash, or disabled.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.transcription.provider.as_str() {
        "disabled" => {}
        "whisper-http" => {
            if config.transcription.url.is_none() {
                anyhow::bail!("transcription.url is required when provider is 'whisper-http'");
            }
        }
        other => anyhow::bail!(
            "Unknown transcription provider: '{}'. Must be whisper-http or disabled.",
            other
        ),
    }

    if config.indexing.batch_size == 0 {
        anyhow::bail!("indexing.batch_size must be > 0");
    }
    for pattern in &config.indexing.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid indexing.exclude_globs pattern: {}", pattern))?;
    }

    if config.retrieval.default_k < 1 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.max_k < config.retrieval.default_k {
        anyhow::bail!("retrieval.max_k must be >= retrieval.default_k");
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        anyhow::bail!("logging.level is not a valid filter: {}", config.logging.level);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.collection.name, "multimodal_collection");
        assert_eq!(config.chunking.max_chars, 250);
        assert_eq!(config.chunking.overlap_chars, 50);
        assert_eq!(config.audio.segment_secs, 10.0);
        assert_eq!(config.embedding.provider, "local");
        assert!(config.embedding.offline);
        assert_eq!(config.indexing.batch_size, 100);
        assert_eq!(config.retrieval.max_k, 100);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
[chunking]
max_chars = 400

[embedding]
provider = "hash"
dims = 64
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chars, 400);
        assert_eq!(config.chunking.overlap_chars, 50);
        assert_eq!(config.embedding.dims, Some(64));
        assert_eq!(config.embedding.batch_size, 32);
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let err = parse_config("[chunking]\nmax_chars = 50\noverlap_chars = 50\n").unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse_config("[transcription]\nprovider = \"whisper-http\"\n").is_err());
        assert!(parse_config(
            "[transcription]\nprovider = \"whisper-http\"\nurl = \"http://localhost:9000\"\n"
        )
        .is_ok());
    }

    #[test]
    fn rejects_bad_globs_and_k() {
        assert!(parse_config("[indexing]\nexclude_globs = [\"a[\"]\n").is_err());
        assert!(parse_config("[retrieval]\ndefault_k = 0\n").is_err());
        assert!(parse_config("[retrieval]\ndefault_k = 20\nmax_k = 10\n").is_err());
    }
}
