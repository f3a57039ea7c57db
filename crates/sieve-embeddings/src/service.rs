//! Embedding service trait and mock implementation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// Trait for embedding text into vectors.
///
/// Implementations are shared across calls behind an `Arc`; the truncation
/// bound is a per-call parameter, never shared model state, so interleaved
/// callers cannot observe each other's settings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// `truncate` bounds the tokenized input length for this call only;
    /// `None` means the model's own maximum applies.
    async fn embed(&self, texts: &[String], truncate: Option<usize>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (default: calls `embed` with one item).
    async fn embed_single(&self, text: &str, truncate: Option<usize>) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()], truncate).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Inference("empty result".into()))
    }

    /// Whether the service is ready for inference.
    fn is_ready(&self) -> bool;

    /// Whether the model is cached locally.
    fn is_model_cached(&self) -> bool;

    /// Output embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Mock embedding service for testing.
///
/// Generates deterministic embeddings by hashing input text with SHA-256,
/// using the hash bytes as seeds for the vector components. Records the
/// size of every batch it receives so tests can assert call patterns.
pub struct MockEmbeddingService {
    dims: usize,
    ready: AtomicBool,
    batch_sizes: parking_lot::Mutex<Vec<usize>>,
}

impl MockEmbeddingService {
    /// Create a new mock service with the given dimensions.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            ready: AtomicBool::new(true),
            batch_sizes: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Set whether this mock is ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Sizes of the batches passed to [`EmbeddingService::embed`] so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Number of [`EmbeddingService::embed`] calls so far.
    pub fn embed_calls(&self) -> usize {
        self.batch_sizes.lock().len()
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        let mut v: Vec<f32> = (0..self.dims)
            .map(|i| {
                let byte_idx = i % hash.len();
                // Map byte to [-1, 1] range
                (f32::from(hash[byte_idx]) / 127.5) - 1.0
            })
            .collect();

        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, texts: &[String], _truncate: Option<usize>) -> Result<Vec<Vec<f32>>> {
        if !self.is_ready() {
            return Err(EmbeddingError::NotReady);
        }
        self.batch_sizes.lock().push(texts.len());
        Ok(texts.iter().map(|t| self.hash_to_vector(t)).collect())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_model_cached(&self) -> bool {
        true
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
