//! Embedding engine configuration.

use serde::{Deserialize, Serialize};
use sieve_settings::types::{Device, EmbeddingSettings};

/// Configuration for the embedding engine.
///
/// Fixed at construction; the engine holds no other persistent state
/// between `filter` calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// ONNX model identifier.
    pub model: String,
    /// Quantization dtype.
    pub dtype: String,
    /// Output embedding dimensions.
    pub dimensions: usize,
    /// Local model cache directory (may contain `~`).
    pub cache_dir: String,
    /// Compute device for inference.
    pub device: Device,
    /// Number of texts encoded per model call. Must be positive.
    pub batch_size: usize,
    /// Maximum tokenized input length; `None` means the model's own limit.
    pub max_length: Option<usize>,
    /// Emit a progress event after this many encoded items; 0 means a
    /// single event at completion only.
    pub log_every: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default())
    }
}

impl EmbeddingConfig {
    /// Create config from settings.
    pub fn from_settings(s: &EmbeddingSettings) -> Self {
        Self {
            model: s.model.clone(),
            dtype: s.dtype.clone(),
            dimensions: s.dimensions,
            cache_dir: s.cache_dir.clone(),
            device: s.device,
            batch_size: s.batch_size,
            max_length: s.max_length,
            log_every: s.log_every,
        }
    }

    /// Resolve the cache directory, expanding `~/` to the home directory.
    pub fn resolved_cache_dir(&self) -> String {
        if self.cache_dir.starts_with("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}{}", home, &self.cache_dir[1..]);
            }
        }
        self.cache_dir.clone()
    }
}
