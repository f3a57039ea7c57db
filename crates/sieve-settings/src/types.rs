//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production default values. Types marked with
//! `#[serde(default)]` allow partial JSON, so missing fields get their
//! default value during deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the sieve engine.
///
/// Loaded from `~/.sieve/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "embedding": { "batchSize": 16, "device": "cpu" },
///   "filter": { "topK": 100 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SieveSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Embedding model settings.
    pub embedding: EmbeddingSettings,
    /// Coarse filter settings.
    pub filter: FilterSettings,
}

impl Default for SieveSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "sieve".to_string(),
            embedding: EmbeddingSettings::default(),
            filter: FilterSettings::default(),
        }
    }
}

/// Compute device for embedding inference.
///
/// Resolved once at construction time and logged, so runs are reproducible
/// across environments. `Accelerator` falls back to CPU with a warning when
/// no accelerator execution provider can be registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU-only execution.
    Cpu,
    /// Hardware-accelerated execution (CUDA) where available.
    #[default]
    Accelerator,
}

/// Embedding model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    /// ONNX model identifier.
    pub model: String,
    /// Quantization dtype (e.g., `"quantized"`).
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

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "Xenova/multilingual-e5-small".to_string(),
            dtype: "quantized".to_string(),
            dimensions: 384,
            cache_dir: "~/.sieve/models".to_string(),
            device: Device::Accelerator,
            batch_size: 8,
            max_length: Some(512),
            log_every: 20,
        }
    }
}

/// Coarse filter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    /// Ranking depth per query. 0 means "return the full ranked corpus";
    /// a value larger than the corpus is clamped to the corpus size.
    pub top_k: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { top_k: 50 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
