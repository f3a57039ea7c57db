//! Coarse filtering: multi-query ranking over a single corpus encoding pass.
//!
//! The corpus is encoded exactly once per `filter` call; each query then
//! costs one single-text encoding plus an O(N·D) dot-product sweep. Both
//! sides are unit-normalized, so the dot product is cosine similarity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::encoder::BatchEncoder;
use crate::errors::{EmbeddingError, Result};
use crate::normalize::dot;
use crate::text::EmbedText;

/// One named query: the text to rank by, plus caller fields passed
/// through verbatim to the corresponding result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterQuery {
    /// Text the corpus is ranked against.
    pub query_text: String,
    /// Opaque caller fields, copied unmodified into the result.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FilterQuery {
    /// Create a query with no pass-through fields.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            fields: Map::new(),
        }
    }
}

/// Per-query ranking result: the original query's fields plus the ranked
/// item indices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankedQuery {
    /// Text the corpus was ranked against.
    pub query_text: String,
    /// Caller fields copied unmodified from the input query.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Item indices sorted by descending similarity, ties broken by
    /// ascending original index.
    pub top_indices: Vec<usize>,
}

/// Output of a single [`CoarseFilter::filter`] call.
///
/// `embeddings` carries the corpus matrix so callers can reuse it for
/// secondary processing without recomputation; it is `None` when the call
/// short-circuited on empty input.
#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    /// One entry per non-blank input query, in input order.
    pub queries: Vec<RankedQuery>,
    /// Corpus embedding matrix; row *i* embeds item *i*.
    pub embeddings: Option<Vec<Vec<f32>>>,
}

/// Ranks a corpus of items against a set of independent queries.
///
/// Holds no per-item state between calls; the corpus matrix is recomputed
/// fresh on every invocation.
pub struct CoarseFilter {
    encoder: BatchEncoder,
    top_k: usize,
}

impl CoarseFilter {
    /// Create a filter with the given ranking depth.
    ///
    /// `top_k == 0` means "return the full ranked corpus"; a value larger
    /// than the corpus is clamped to the corpus size at ranking time.
    pub fn new(encoder: BatchEncoder, top_k: usize) -> Self {
        Self { encoder, top_k }
    }

    /// Rank `items` against each query in `queries`.
    ///
    /// Empty `items` or `queries` short-circuits to an empty outcome
    /// without touching the embedding service. Queries whose text is blank
    /// after trimming are skipped and absent from the output; the
    /// remaining queries are still processed. Model failures propagate.
    pub async fn filter<T: EmbedText>(
        &self,
        items: &[T],
        queries: &[FilterQuery],
    ) -> Result<FilterOutcome> {
        if items.is_empty() {
            warn!("empty corpus, skipping coarse filter");
            return Ok(FilterOutcome::default());
        }
        if queries.is_empty() {
            warn!("no queries, skipping coarse filter");
            return Ok(FilterOutcome::default());
        }

        // One corpus pass, regardless of query count.
        let corpus = self.encoder.encode_documents(items).await?;

        let mut ranked = Vec::with_capacity(queries.len());
        for query in queries {
            let text = query.query_text.trim();
            if text.is_empty() {
                warn!("blank query text, skipping query");
                continue;
            }

            debug!(query = %preview(text), "ranking corpus against query");
            let query_vec = self
                .encoder
                .encode_queries(std::slice::from_ref(&query.query_text))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Inference("empty query embedding".into()))?;

            let sims: Vec<f32> = corpus.iter().map(|row| dot(row, &query_vec)).collect();
            ranked.push(RankedQuery {
                query_text: query.query_text.clone(),
                fields: query.fields.clone(),
                top_indices: top_k_indices(&sims, self.top_k),
            });
        }

        Ok(FilterOutcome {
            queries: ranked,
            embeddings: Some(corpus),
        })
    }
}

/// Select up to `top_k` indices by descending similarity.
///
/// `top_k == 0` or `top_k > n` selects the full corpus. Equal similarities
/// keep ascending original-index order, so the result matches a full
/// descending stable sort truncated to k.
fn top_k_indices(sims: &[f32], top_k: usize) -> Vec<usize> {
    let n = sims.len();
    let k = if top_k == 0 || top_k > n { n } else { top_k };
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| sims[b].total_cmp(&sims[a]).then(a.cmp(&b)));
    indices.truncate(k);
    indices
}

/// First 40 characters of a query for log lines.
fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::errors::Result;
    use crate::service::{EmbeddingService, MockEmbeddingService};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn make_filter(top_k: usize) -> (Arc<MockEmbeddingService>, CoarseFilter) {
        let service = Arc::new(MockEmbeddingService::new(16));
        let config = EmbeddingConfig::default();
        let encoder =
            BatchEncoder::new(Arc::clone(&service) as Arc<dyn EmbeddingService>, &config).unwrap();
        (service, CoarseFilter::new(encoder, top_k))
    }

    fn query(text: &str) -> FilterQuery {
        FilterQuery::new(text)
    }

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item{i}")).collect()
    }

    /// Service with engineered, pre-normalized 3-d embeddings so rankings
    /// are known in advance. Unknown texts embed to the zero vector.
    struct FixtureService {
        vectors: HashMap<String, Vec<f32>>,
    }

    impl FixtureService {
        fn new(vectors: &[(&str, [f32; 3])]) -> Self {
            Self {
                vectors: vectors
                    .iter()
                    .map(|(text, v)| ((*text).to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingService for FixtureService {
        async fn embed(&self, texts: &[String], _truncate: Option<usize>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0; 3]))
                .collect())
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn is_model_cached(&self) -> bool {
            true
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    /// Five items engineered so that, against the probe query, item 2 is
    /// closest, item 0 next, item 4 third, and items 1 and 3 tie at zero.
    fn fixture_filter(top_k: usize) -> CoarseFilter {
        let service = FixtureService::new(&[
            ("item0", [0.8, 0.6, 0.0]),
            ("item1", [0.0, 1.0, 0.0]),
            ("item2", [0.9701425, 0.2425356, 0.0]),
            ("item3", [0.0, 0.0, 1.0]),
            ("item4", [0.6, 0.8, 0.0]),
            ("query: probe", [1.0, 0.0, 0.0]),
        ]);
        let config = EmbeddingConfig::default();
        let encoder = BatchEncoder::new(Arc::new(service), &config).unwrap();
        CoarseFilter::new(encoder, top_k)
    }

    #[tokio::test]
    async fn empty_items_short_circuits() {
        let (service, filter) = make_filter(5);
        let no_items: Vec<String> = vec![];
        let outcome = filter.filter(&no_items, &[query("q")]).await.unwrap();
        assert!(outcome.queries.is_empty());
        assert!(outcome.embeddings.is_none());
        assert_eq!(service.embed_calls(), 0);
    }

    #[tokio::test]
    async fn empty_queries_short_circuits() {
        let (service, filter) = make_filter(5);
        let outcome = filter.filter(&items(3), &[]).await.unwrap();
        assert!(outcome.queries.is_empty());
        assert!(outcome.embeddings.is_none());
        assert_eq!(service.embed_calls(), 0);
    }

    #[tokio::test]
    async fn corpus_encoded_once_for_many_queries() {
        let (service, filter) = make_filter(5);
        let queries = vec![query("alpha"), query("beta"), query("gamma")];
        let outcome = filter.filter(&items(3), &queries).await.unwrap();
        assert_eq!(outcome.queries.len(), 3);
        // One batch for the 3-item corpus plus one per query.
        assert_eq!(service.batch_sizes(), vec![3, 1, 1, 1]);
    }

    #[tokio::test]
    async fn embeddings_row_per_item_in_input_order() {
        let (service, filter) = make_filter(5);
        let corpus = items(4);
        let outcome = filter.filter(&corpus, &[query("q")]).await.unwrap();
        let matrix = outcome.embeddings.unwrap();
        assert_eq!(matrix.len(), 4);
        for (i, item) in corpus.iter().enumerate() {
            let direct = service.embed_single(item, None).await.unwrap();
            assert_eq!(matrix[i], direct, "row {i} should embed items[{i}]");
        }
    }

    #[tokio::test]
    async fn blank_query_skipped_others_processed() {
        let (_, filter) = make_filter(5);
        let queries = vec![query("   "), query("valid"), query("\t\n")];
        let outcome = filter.filter(&items(3), &queries).await.unwrap();
        assert_eq!(outcome.queries.len(), 1);
        assert_eq!(outcome.queries[0].query_text, "valid");
    }

    #[tokio::test]
    async fn pass_through_fields_preserved() {
        let (_, filter) = make_filter(5);
        let mut q = query("valid");
        let _ = q.fields.insert("id".into(), json!("q-7"));
        let _ = q.fields.insert("weight".into(), json!(0.25));
        let _ = q.fields.insert("tags".into(), json!(["nlp", "ranking"]));
        let outcome = filter.filter(&items(3), &[q]).await.unwrap();
        let ranked = &outcome.queries[0];
        assert_eq!(ranked.fields["id"], json!("q-7"));
        assert_eq!(ranked.fields["weight"], json!(0.25));
        assert_eq!(ranked.fields["tags"], json!(["nlp", "ranking"]));
    }

    #[tokio::test]
    async fn ranked_query_serializes_flat() {
        let (_, filter) = make_filter(2);
        let mut q = query("valid");
        let _ = q.fields.insert("id".into(), json!("q-1"));
        let outcome = filter.filter(&items(3), &[q]).await.unwrap();
        let value = serde_json::to_value(&outcome.queries[0]).unwrap();
        assert_eq!(value["query_text"], json!("valid"));
        assert_eq!(value["id"], json!("q-1"));
        assert!(value["top_indices"].is_array());
    }

    #[tokio::test]
    async fn filter_query_deserializes_extra_fields() {
        let q: FilterQuery =
            serde_json::from_value(json!({"query_text": "t", "label": "x", "rank": 3})).unwrap();
        assert_eq!(q.query_text, "t");
        assert_eq!(q.fields["label"], json!("x"));
        assert_eq!(q.fields["rank"], json!(3));
    }

    #[tokio::test]
    async fn top_k_within_corpus_returns_k() {
        let (_, filter) = make_filter(2);
        let outcome = filter.filter(&items(5), &[query("q")]).await.unwrap();
        assert_eq!(outcome.queries[0].top_indices.len(), 2);
    }

    #[tokio::test]
    async fn top_k_zero_returns_full_corpus() {
        let (_, filter) = make_filter(0);
        let outcome = filter.filter(&items(5), &[query("q")]).await.unwrap();
        assert_eq!(outcome.queries[0].top_indices.len(), 5);
    }

    #[tokio::test]
    async fn top_k_over_corpus_clamps_to_n() {
        let (_, filter) = make_filter(100);
        let outcome = filter.filter(&items(5), &[query("q")]).await.unwrap();
        assert_eq!(outcome.queries[0].top_indices.len(), 5);
    }

    #[tokio::test]
    async fn engineered_corpus_ranks_expected_order() {
        let filter = fixture_filter(3);
        let outcome = filter.filter(&items(5), &[query("probe")]).await.unwrap();
        assert_eq!(outcome.queries[0].top_indices, vec![2, 0, 4]);
    }

    #[tokio::test]
    async fn engineered_corpus_oversized_top_k_returns_all_descending() {
        let filter = fixture_filter(100);
        let outcome = filter.filter(&items(5), &[query("probe")]).await.unwrap();
        // Items 1 and 3 tie at similarity 0; ascending index breaks the tie.
        assert_eq!(outcome.queries[0].top_indices, vec![2, 0, 4, 1, 3]);
    }

    #[tokio::test]
    async fn equal_similarity_ties_break_by_index() {
        // All items identical, so every similarity ties.
        let service = FixtureService::new(&[
            ("item0", [1.0, 0.0, 0.0]),
            ("item1", [1.0, 0.0, 0.0]),
            ("item2", [1.0, 0.0, 0.0]),
            ("query: probe", [1.0, 0.0, 0.0]),
        ]);
        let config = EmbeddingConfig::default();
        let encoder = BatchEncoder::new(Arc::new(service), &config).unwrap();
        let filter = CoarseFilter::new(encoder, 0);
        let outcome = filter.filter(&items(3), &[query("probe")]).await.unwrap();
        assert_eq!(outcome.queries[0].top_indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn filter_is_deterministic_across_calls() {
        let (_, filter) = make_filter(3);
        let corpus = items(6);
        let queries = vec![query("alpha"), query("beta")];
        let first = filter.filter(&corpus, &queries).await.unwrap();
        let second = filter.filter(&corpus, &queries).await.unwrap();
        for (a, b) in first.queries.iter().zip(second.queries.iter()) {
            assert_eq!(a.top_indices, b.top_indices);
        }
        assert_eq!(first.embeddings, second.embeddings);
    }

    #[tokio::test]
    async fn service_failure_propagates() {
        let (service, filter) = make_filter(3);
        service.set_ready(false);
        let result = filter.filter(&items(3), &[query("q")]).await;
        assert!(matches!(result, Err(EmbeddingError::NotReady)));
    }

    #[test]
    fn top_k_indices_descending_order() {
        let sims = vec![0.1, 0.9, 0.5];
        assert_eq!(top_k_indices(&sims, 0), vec![1, 2, 0]);
    }

    #[test]
    fn top_k_indices_truncates() {
        let sims = vec![0.1, 0.9, 0.5, 0.7];
        assert_eq!(top_k_indices(&sims, 2), vec![1, 3]);
    }

    #[test]
    fn top_k_indices_stable_on_ties() {
        let sims = vec![0.5, 0.9, 0.5, 0.5];
        assert_eq!(top_k_indices(&sims, 0), vec![1, 0, 2, 3]);
    }

    #[test]
    fn top_k_indices_empty() {
        assert!(top_k_indices(&[], 3).is_empty());
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), 40);
        assert_eq!(preview("short"), "short");
    }
}
