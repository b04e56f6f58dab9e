use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Trawl
#[derive(Error, Debug)]
pub enum TrawlError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding model could not be materialized
    #[error("Embedding model unavailable: {model_id}: {reason}")]
    ModelUnavailable { model_id: String, reason: String },

    /// Encoder failed on a batch
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// Vector dimension does not match the collection
    #[error("Dimension mismatch for collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Collection does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection name fails the naming rules
    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    /// Row or conversation target does not exist
    #[error("Record '{id}' not found in collection '{collection}'")]
    NotFound { collection: String, id: String },

    /// Filter compiler rejected a predicate
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// ANN index unreadable; recoverable by rebuilding from raw vectors
    #[error("Vector index corrupted for collection '{collection}': {reason}")]
    CorruptIndex { collection: String, reason: String },

    /// Task registry lookup miss
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Task was cancelled at a stage or batch boundary
    #[error("Task cancelled")]
    Cancelled,

    /// Keyword boost index errors
    #[error("Keyword index error: {0}")]
    KeywordIndex(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;
