//! # sieve-embeddings
//!
//! Batched text embedding and semantic coarse filtering.
//!
//! Given a corpus of items and a set of named queries, [`CoarseFilter`]
//! encodes the corpus once, encodes each query with the E5 query-side
//! marker, and ranks items by dot product. Every vector the encoder
//! produces is unit-normalized, so the dot product is cosine similarity.
//!
//! ## Crate Position
//!
//! Depends on: sieve-settings.
//! The ONNX inference path (`ort`, `tokenizers`, `hf-hub`) is gated
//! behind the `ort` feature.

#![deny(unsafe_code)]

pub mod config;
pub mod encoder;
pub mod errors;
pub mod filter;
pub mod normalize;
#[cfg(feature = "ort")]
pub mod ort_service;
pub mod service;
pub mod text;

pub use config::EmbeddingConfig;
pub use encoder::{BatchEncoder, QUERY_PREFIX};
pub use errors::{EmbeddingError, Result};
pub use filter::{CoarseFilter, FilterOutcome, FilterQuery, RankedQuery};
pub use normalize::{cosine_similarity, dot, l2_norm, l2_normalize};
#[cfg(feature = "ort")]
pub use ort_service::OnnxEmbeddingService;
pub use service::{EmbeddingService, MockEmbeddingService};
pub use sieve_settings::types::Device;
pub use text::EmbedText;
