//! Error types for timer-encoder-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Backbone identifier unresolvable or its weights unavailable.
    #[error("model load: {0}")]
    ModelLoad(String),

    /// Requested compute device is unknown or not available in this build.
    #[error("device: {0}")]
    Device(String),

    /// Tensor shape incompatible with the stage it is fed to.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
