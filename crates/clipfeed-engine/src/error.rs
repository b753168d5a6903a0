use thiserror::Error;

/// Failures inside the playback and preload engine.
///
/// Acquisition and preload errors are handled where they occur (bounded
/// retry + log); only command plumbing surfaces them, wrapped in `anyhow`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("listing fetch failed: {0}")]
    Fetch(String),

    #[error("resource load failed for {url}: {reason}")]
    ResourceLoad { url: String, reason: String },

    /// The platform refused to start playback without a user gesture.
    #[error("playback denied until the next user gesture")]
    PlaybackDenied,

    #[error("preload failed for {url}: {reason}")]
    Preload { url: String, reason: String },

    #[error("upload of {name} failed: {reason}")]
    Upload { name: String, reason: String },

    /// Output context or helper process failure.
    #[error("audio backend: {0}")]
    Backend(String),

    #[error("recording: {0}")]
    Recording(String),
}

impl EngineError {
    pub fn load(url: &str, reason: impl std::fmt::Display) -> Self {
        EngineError::ResourceLoad {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn backend(reason: impl std::fmt::Display) -> Self {
        EngineError::Backend(reason.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
