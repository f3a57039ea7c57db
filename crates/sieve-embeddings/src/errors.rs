//! Embedding error types.
//!
//! Empty or blank inputs are not errors; the engine absorbs them and
//! returns reduced results. Model and device failures are fatal for the
//! current call and always propagate.

use thiserror::Error;

/// Errors from embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Model initialization failed.
    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    /// Inference failed.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Service not ready (model not loaded).
    #[error("Embedding service not ready")]
    NotReady,

    /// Generic internal error.
    #[error("{0}")]
    Internal(String),
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;
