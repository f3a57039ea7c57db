//! Batched encoding with the asymmetric query/document convention.
//!
//! E5-family checkpoints are trained with asymmetric inputs: document text
//! is embedded unmarked, query text carries a literal `"query: "` prefix.
//! The encoder applies that convention, splits work into fixed-size
//! batches, and guarantees that every row it returns is L2-normalized so
//! downstream ranking can use a plain dot product as cosine similarity.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::EmbeddingConfig;
use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;
use crate::service::EmbeddingService;
use crate::text::EmbedText;

/// Query-side marker for E5-family models.
pub const QUERY_PREFIX: &str = "query: ";

/// Converts raw strings into a normalized embedding matrix.
///
/// Wraps a shared [`EmbeddingService`]; the truncation bound is threaded
/// through each `embed` call rather than stored on the model, so encoders
/// sharing a service never interfere with each other.
pub struct BatchEncoder {
    service: Arc<dyn EmbeddingService>,
    batch_size: usize,
    max_length: Option<usize>,
    log_every: usize,
}

impl BatchEncoder {
    /// Create a new encoder over a shared service.
    ///
    /// Returns a config error if `batch_size` is zero.
    pub fn new(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(EmbeddingError::Config("batchSize must be positive".into()));
        }
        Ok(Self {
            service,
            batch_size: config.batch_size,
            max_length: config.max_length,
            log_every: config.log_every,
        })
    }

    /// Output embedding dimensions of the underlying service.
    pub fn dimensions(&self) -> usize {
        self.service.dimensions()
    }

    /// Encode corpus items into a normalized embedding matrix.
    ///
    /// Row *i* of the result is the embedding of `items[i]`. Blank item
    /// text is embedded as the empty string rather than rejected. An empty
    /// input returns an empty matrix without invoking the service.
    pub async fn encode_documents<T: EmbedText>(&self, items: &[T]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = items
            .iter()
            .map(|item| {
                let text = item.embed_text();
                if text.trim().is_empty() {
                    String::new()
                } else {
                    text
                }
            })
            .collect();
        if !texts.is_empty() {
            info!(total = texts.len(), "encoding corpus");
        }
        self.encode_batched(texts).await
    }

    /// Encode query texts into a normalized embedding matrix.
    ///
    /// Each non-blank text is prefixed with [`QUERY_PREFIX`]; blank text
    /// passes through as the empty string, unprefixed. The result has one
    /// row per input text.
    pub async fn encode_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let decorated: Vec<String> = texts
            .iter()
            .map(|t| {
                let t = t.trim();
                if t.is_empty() {
                    String::new()
                } else {
                    format!("{QUERY_PREFIX}{t}")
                }
            })
            .collect();
        self.encode_batched(decorated).await
    }

    /// Run the service over `texts` in `batch_size` chunks, normalizing
    /// every output row and emitting throughput progress events.
    async fn encode_batched(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let total = texts.len();
        let start = Instant::now();
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(total);
        let mut processed = 0usize;
        let mut next_log_at = self.log_every;

        for batch in texts.chunks(self.batch_size) {
            let mut batch_rows = self.service.embed(batch, self.max_length).await?;
            for row in &mut batch_rows {
                l2_normalize(row);
            }
            processed += batch.len();
            rows.append(&mut batch_rows);

            if self.log_every > 0 {
                while processed >= next_log_at && next_log_at <= total {
                    let rate = throughput(processed, start.elapsed().as_secs_f64());
                    info!(processed, total, rate = format!("{rate:.2}"), "encoding progress");
                    next_log_at += self.log_every;
                }
            } else if processed == total {
                let rate = throughput(processed, start.elapsed().as_secs_f64());
                info!(processed, total, rate = format!("{rate:.2}"), "encoding complete");
            }
        }

        Ok(rows)
    }
}

/// Items per second since `start`; 0 when no time has elapsed.
#[allow(clippy::cast_precision_loss)]
fn throughput(processed: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        processed as f64 / elapsed_secs
    } else {
        0.0
    }
}
