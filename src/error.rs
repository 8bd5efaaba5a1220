use crate::events::EventKind;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the enrichd application
#[derive(Error, Debug)]
pub enum EnrichdError {
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

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// No persistent store configured for the asset registry
    #[error("missing persistent store for asset registry")]
    MissingPersistence,

    /// Structural decode failure for a single event
    #[error("failed to decode {kind} event: {source}")]
    Decode {
        kind: EventKind,
        source: serde_json::Error,
    },

    /// Event carries no asset sub-object to enrich
    #[error("missing asset data for {kind} event: {summary}")]
    MissingAssetData { kind: EventKind, summary: String },

    /// Directory service lookup errors
    #[error("Directory lookup error: {0}")]
    Directory(String),

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

/// Result type for enrichd operations
pub type Result<T> = std::result::Result<T, EnrichdError>;
