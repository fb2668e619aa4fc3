use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the document pipeline.
///
/// Built once at process start with [`Config::from_env`] and handed to services
/// by `Arc`; nothing reads the environment at call time, so tests can construct
/// a `Config` literal with substituted endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Predict endpoint of the embedding provider.
    pub embedding_endpoint: String,
    /// Static API key sent to the embedding provider, if required.
    pub embedding_api_key: Option<String>,
    /// Embedding model identifier, reported for diagnostics.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of texts embedded concurrently per batch.
    pub embedding_batch_size: usize,
    /// Base URL of the vector store holding persisted chunks.
    pub vector_store_url: String,
    /// Collection name used for document chunks.
    pub vector_store_collection: String,
    /// Optional API key required to access the vector store.
    pub vector_store_api_key: Option<String>,
    /// Base URL of the OCR extraction service, when available.
    pub ocr_endpoint: Option<String>,
    /// Optional bearer token for the OCR service.
    pub ocr_api_key: Option<String>,
    /// Request timeout for OCR calls, in seconds.
    pub ocr_timeout_secs: u64,
    /// Root directory for the filesystem blob store.
    pub blob_store_root: String,
    /// Maximum delivery attempts per queued job.
    pub queue_max_attempts: u32,
    /// Initial backoff between redeliveries, in seconds (doubles each attempt).
    pub queue_backoff_secs: u64,
    /// Default number of results returned by similarity search.
    pub search_default_limit: usize,
    /// Hard cap on requested search limits.
    pub search_max_limit: usize,
    /// Default minimum similarity accepted from the vector store.
    pub search_default_score_threshold: f32,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Path of the appended log file.
    pub log_file: String,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            embedding_endpoint: load_env("EMBEDDING_ENDPOINT")?,
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_required("EMBEDDING_DIMENSION")?,
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE", 5)?,
            vector_store_url: load_env("VECTOR_STORE_URL")?,
            vector_store_collection: load_env("VECTOR_STORE_COLLECTION")?,
            vector_store_api_key: load_env_optional("VECTOR_STORE_API_KEY"),
            ocr_endpoint: load_env_optional("OCR_ENDPOINT"),
            ocr_api_key: load_env_optional("OCR_API_KEY"),
            ocr_timeout_secs: parse_optional("OCR_TIMEOUT_SECS", 300)?,
            blob_store_root: load_env_optional("BLOB_STORE_ROOT")
                .unwrap_or_else(|| "data/blobs".to_string()),
            queue_max_attempts: parse_optional("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_backoff_secs: parse_optional("QUEUE_BACKOFF_SECS", 5)?,
            search_default_limit: parse_optional("SEARCH_DEFAULT_LIMIT", 10)?,
            search_max_limit: parse_optional("SEARCH_MAX_LIMIT", 50)?,
            search_default_score_threshold: parse_optional("SEARCH_SCORE_THRESHOLD", 0.7)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            log_file: load_env_optional("DOCPIPE_LOG_FILE")
                .unwrap_or_else(|| "logs/docpipe.log".to_string()),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    load_env(key)?
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}
