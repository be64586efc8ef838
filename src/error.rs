//! Error types for the vision narrator

use thiserror::Error;

/// Result type alias for narrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the vision narrator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera or microphone could not be acquired
    #[error("acquisition error: {0}")]
    Acquisition(String),

    /// One frame's inference failed
    #[error("detection error: {0}")]
    Detection(String),

    /// Overlay drawing failed
    #[error("overlay error: {0}")]
    Overlay(String),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Remote language model request or response error
    #[error("remote model error: {0}")]
    Remote(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error is transient for a single frame tick
    #[must_use]
    pub const fn is_tick_local(&self) -> bool {
        matches!(self, Self::Detection(_) | Self::Overlay(_))
    }
}
