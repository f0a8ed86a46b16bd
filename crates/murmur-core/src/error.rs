//! Error types for the Murmur core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy, surfaced verbatim to gateway clients.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested identifier is not in the static catalog.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Load requested while the model is already loaded.
    #[error("model {0} is already loaded")]
    AlreadyLoaded(String),

    /// Unload or generation requested while the model is not loaded.
    #[error("model {0} is not loaded")]
    NotLoaded(String),

    /// A transition or generation is already in flight for this model.
    /// Never queued server-side; the client retries once it completes.
    #[error("model {0} is busy with another operation")]
    Busy(String),

    /// Request parameters failed validation. Names the offending field.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The inference capability raised during synthesis. Not retried.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// A load transition failed; the model entry is left in the Error
    /// state and remains retriable via a fresh load.
    #[error("failed to load {model}: {message}")]
    LoadFailed { model: String, message: String },

    /// An unload transition failed. Never masked as a successful
    /// release.
    #[error("failed to unload {model}: {message}")]
    UnloadFailed { model: String, message: String },

    /// A generation exceeded the configured ceiling. The underlying
    /// operation continues in the background; registry state is left
    /// as-is.
    #[error("generation timed out after {0} seconds")]
    Timeout(u64),

    /// Inference backend transport or protocol failure.
    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable wire identifier for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownModel(_) => "unknown_model",
            Error::AlreadyLoaded(_) => "already_loaded",
            Error::NotLoaded(_) => "not_loaded",
            Error::Busy(_) => "busy",
            Error::InvalidInput { .. } => "invalid_input",
            Error::GenerationFailed(_) => "generation_failed",
            Error::LoadFailed { .. } => "load_failed",
            Error::UnloadFailed { .. } => "unload_failed",
            Error::Timeout(_) => "timeout",
            Error::Backend(_) => "backend_error",
            Error::Io(_) => "io_error",
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}
