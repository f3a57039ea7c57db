//! ONNX Runtime embedding service (feature-gated behind `ort`).
//!
//! Downloads an E5-family ONNX model via `hf-hub`, tokenizes with
//! `tokenizers`, runs inference via `ort`, then applies mean pooling over
//! the attention mask and L2 normalization. The truncation bound is a
//! per-call parameter applied to the tokenized ids inside the session
//! lock, so concurrent callers never observe each other's settings.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider as _};
use ort::session::builder::GraphOptimizationLevel;
use tracing::{debug, info, warn};

use sieve_settings::types::Device;

use crate::config::EmbeddingConfig;
use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;
use crate::service::EmbeddingService;

/// ONNX-based embedding service for E5-family models.
pub struct OnnxEmbeddingService {
    config: EmbeddingConfig,
    session: parking_lot::Mutex<Option<ort::session::Session>>,
    tokenizer: parking_lot::Mutex<Option<tokenizers::Tokenizer>>,
    ready: AtomicBool,
}

impl OnnxEmbeddingService {
    /// Create a new ONNX embedding service (not yet initialized).
    ///
    /// The compute device is fixed here and logged so runs are
    /// reproducible across environments.
    pub fn new(config: EmbeddingConfig) -> Self {
        info!(device = ?config.device, model = %config.model, "embedding device resolved");
        Self {
            config,
            session: parking_lot::Mutex::new(None),
            tokenizer: parking_lot::Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Initialize the service: download model + tokenizer, create ONNX session.
    ///
    /// Does blocking I/O internally (model download, file reads).
    /// Caller should `tokio::spawn` this as a fire-and-forget task.
    pub async fn initialize(&self) -> Result<()> {
        // Everything here is blocking I/O, so run it in spawn_blocking to
        // avoid stalling the tokio runtime.
        let (tok, session) = tokio::task::spawn_blocking({
            let config = self.config.clone();
            move || -> Result<(tokenizers::Tokenizer, ort::session::Session)> {
                let (model_path, tokenizer_path) = download_model(&config)?;

                info!(model = %model_path.display(), "loading ONNX model");

                let tok = tokenizers::Tokenizer::from_file(&tokenizer_path)
                    .map_err(|e| EmbeddingError::ModelInit(format!("tokenizer load: {e}")))?;

                let mut builder = ort::session::Session::builder()
                    .map_err(|e| EmbeddingError::ModelInit(format!("session builder: {e}")))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| EmbeddingError::ModelInit(format!("optimization level: {e}")))?
                    .with_intra_threads(2)
                    .map_err(|e| EmbeddingError::ModelInit(format!("thread config: {e}")))?
                    .with_log_level(ort::logging::LogLevel::Warning)
                    .map_err(|e| EmbeddingError::ModelInit(format!("log level: {e}")))?;

                match config.device {
                    Device::Cpu => {
                        info!("using CPU execution");
                    }
                    Device::Accelerator => {
                        let cuda = CUDAExecutionProvider::default();
                        if cuda.register(&mut builder).is_ok() {
                            info!("CUDA execution provider registered");
                        } else {
                            warn!("CUDA not available, falling back to CPU");
                        }
                    }
                }

                let session = builder
                    .commit_from_file(&model_path)
                    .map_err(|e| EmbeddingError::ModelInit(format!("model load: {e}")))?;

                Ok((tok, session))
            }
        })
        .await
        .map_err(|e| EmbeddingError::Internal(format!("join error: {e}")))??;

        *self.tokenizer.lock() = Some(tok);
        *self.session.lock() = Some(session);
        self.ready.store(true, Ordering::SeqCst);

        info!("ONNX embedding service ready");
        Ok(())
    }

    /// Get the expected model cache path.
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(self.config.resolved_cache_dir())
    }
}

/// Download model files via `hf-hub`, returning (`model_path`, `tokenizer_path`).
fn download_model(config: &EmbeddingConfig) -> Result<(PathBuf, PathBuf)> {
    let cache_dir = config.resolved_cache_dir();
    debug!(cache_dir, model = %config.model, "downloading model via hf-hub");

    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(PathBuf::from(&cache_dir))
        .build()
        .map_err(|e| EmbeddingError::ModelInit(format!("hf-hub api: {e}")))?;

    let repo = api.model(config.model.clone());

    let model_filename = format!("onnx/model_{}.onnx", config.dtype);
    let model_path = repo
        .get(&model_filename)
        .map_err(|e| EmbeddingError::ModelInit(format!("model download ({model_filename}): {e}")))?;

    let tokenizer_path = repo
        .get("tokenizer.json")
        .map_err(|e| EmbeddingError::ModelInit(format!("tokenizer download: {e}")))?;

    info!(model = %model_path.display(), tokenizer = %tokenizer_path.display(), "model files ready");
    Ok((model_path, tokenizer_path))
}

/// Run inference on a batch of texts.
fn run_inference(
    session: &mut ort::session::Session,
    tokenizer: &tokenizers::Tokenizer,
    texts: &[String],
    truncate: Option<usize>,
    config: &EmbeddingConfig,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    // Tokenize batch
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| EmbeddingError::Inference(format!("tokenize: {e}")))?;

    // Per-call truncation bound, then pad to the longest remaining input
    let bound = truncate.unwrap_or(usize::MAX);
    let lengths: Vec<usize> = encodings
        .iter()
        .map(|e| e.get_ids().len().min(bound))
        .collect();
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    if max_len == 0 {
        return Err(EmbeddingError::Inference("empty tokenization".into()));
    }

    let batch_size = texts.len();

    // Build padded input_ids, attention_mask, and token_type_ids as flat Vec<i64>
    let mut input_ids = vec![0i64; batch_size * max_len];
    let mut attention_mask = vec![0i64; batch_size * max_len];
    let token_type_ids = vec![0i64; batch_size * max_len];

    for (i, enc) in encodings.iter().enumerate() {
        let len = lengths[i];
        let ids = &enc.get_ids()[..len];
        let mask = &enc.get_attention_mask()[..len];
        let offset = i * max_len;
        for (j, &id) in ids.iter().enumerate() {
            input_ids[offset + j] = i64::from(id);
        }
        for (j, &m) in mask.iter().enumerate() {
            attention_mask[offset + j] = i64::from(m);
        }
    }

    // Create ort Tensors from (shape, data)
    #[allow(clippy::cast_possible_wrap)]
    let shape = vec![batch_size as i64, max_len as i64];

    let input_ids_tensor = ort::value::Tensor::from_array((shape.clone(), input_ids))
        .map_err(|e| EmbeddingError::Inference(format!("input_ids tensor: {e}")))?;
    let attention_mask_tensor =
        ort::value::Tensor::from_array((shape.clone(), attention_mask.clone()))
            .map_err(|e| EmbeddingError::Inference(format!("attention_mask tensor: {e}")))?;
    let token_type_ids_tensor = ort::value::Tensor::from_array((shape, token_type_ids))
        .map_err(|e| EmbeddingError::Inference(format!("token_type_ids tensor: {e}")))?;

    // Run ONNX session
    let outputs = session
        .run(ort::inputs![
            input_ids_tensor,
            attention_mask_tensor,
            token_type_ids_tensor
        ])
        .map_err(|e| EmbeddingError::Inference(format!("inference: {e}")))?;

    // Extract output tensor (shape: [batch_size, seq_len, hidden_dim])
    let output_value = &outputs[0];
    let (output_shape, output_data) = output_value
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbeddingError::Inference(format!("extract tensor: {e}")))?;

    // Shape derefs to &[i64]; should be [batch_size, seq_len, hidden_dim]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
    if dims.len() != 3 || dims[0] != batch_size {
        return Err(EmbeddingError::Inference(format!(
            "unexpected output shape: {output_shape:?}"
        )));
    }
    let seq_len_out = dims[1];
    let hidden_dim = dims[2];
    if hidden_dim != config.dimensions {
        return Err(EmbeddingError::Inference(format!(
            "model hidden dim {hidden_dim} does not match configured dimensions {}",
            config.dimensions
        )));
    }

    // Mean pooling over non-padding tokens, then L2 normalization
    let mut results = Vec::with_capacity(batch_size);
    for i in 0..batch_size {
        let mut pooled = mean_pool(
            output_data,
            &attention_mask,
            i,
            max_len,
            seq_len_out,
            hidden_dim,
        );
        l2_normalize(&mut pooled);
        results.push(pooled);
    }

    Ok(results)
}

/// Average the hidden states of batch item `i` over its non-padding tokens.
#[allow(clippy::cast_precision_loss)]
fn mean_pool(
    output_data: &[f32],
    attention_mask: &[i64],
    batch_idx: usize,
    mask_len: usize,
    seq_len: usize,
    hidden_dim: usize,
) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0usize;
    for j in 0..mask_len.min(seq_len) {
        if attention_mask[batch_idx * mask_len + j] != 0 {
            let base = (batch_idx * seq_len + j) * hidden_dim;
            for (d, out) in pooled.iter_mut().enumerate() {
                *out += output_data[base + d];
            }
            count += 1;
        }
    }
    if count > 0 {
        for x in &mut pooled {
            *x /= count as f32;
        }
    }
    pooled
}

#[async_trait]
impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, texts: &[String], truncate: Option<usize>) -> Result<Vec<Vec<f32>>> {
        if !self.is_ready() {
            return Err(EmbeddingError::NotReady);
        }

        let mut session_guard = self.session.lock();
        let tokenizer_guard = self.tokenizer.lock();

        let session = session_guard.as_mut().ok_or(EmbeddingError::NotReady)?;
        let tokenizer = tokenizer_guard.as_ref().ok_or(EmbeddingError::NotReady)?;

        run_inference(session, tokenizer, texts, truncate, &self.config)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_model_cached(&self) -> bool {
        self.model_path().exists()
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}
