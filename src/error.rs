//! Error types for hermes-wake.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("No wakeword decoder could be loaded")]
    NoDecodersLoaded,

    // Decoder errors
    #[error("Failed to load model for wakeword '{wakeword_id}': {message}")]
    ModelLoad {
        wakeword_id: String,
        message: String,
    },

    #[error("Decoder for wakeword '{wakeword_id}' on site '{site_id}' is not loaded")]
    DecoderNotReady {
        site_id: String,
        wakeword_id: String,
    },

    #[error("Decoder failed: {message}")]
    Decoder { message: String },

    // Audio errors
    #[error("Audio chunk of {size} bytes exceeds limit of {limit} bytes")]
    BufferOverrun { size: usize, limit: usize },

    #[error("Invalid audio payload: {message}")]
    AudioFormat { message: String },

    // Message bus errors
    #[error("Message bus disconnected: {message}")]
    TransportDisconnected { message: String },

    #[error("Message bus error: {message}")]
    Transport { message: String },

    #[error("Invalid message on {topic}: {message}")]
    Protocol { topic: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WakeError>;
