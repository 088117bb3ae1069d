//! Query engine: embed → retrieve top-K → year filter → keyword filter → rerank.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::types::SearchHit;
use crate::search::embedder::{Embedder, EmbedderError, l2_normalize};
use crate::search::filters::{KeywordFilter, YearRange, apply_keyword_filter, apply_year_filter};
use crate::search::reranker::Reranker;
use crate::search::store::{IndexStore, StoreError};

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("invalid year range {0}: start is after end")]
    InvalidYearRange(YearRange),
    #[error("embedder '{embedder}' does not match index built with '{index}'")]
    EmbedderMismatch { embedder: String, index: String },
    #[error("embedder dimension {embedder} does not match index dimension {index}")]
    DimensionMismatch { embedder: usize, index: usize },
    #[error(transparent)]
    Embedding(#[from] EmbedderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SearchResult<T> = Result<T, SearchError>;

/// One search call's parameters.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub years: Option<YearRange>,
    pub keywords: KeywordFilter,
    pub rerank: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            years: None,
            keywords: KeywordFilter::default(),
            rerank: true,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn years(mut self, years: YearRange) -> Self {
        self.years = Some(years);
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = KeywordFilter::new(keywords);
        self
    }

    pub fn rerank(mut self, enabled: bool) -> Self {
        self.rerank = enabled;
        self
    }
}

/// Shared, immutable search pipeline.
///
/// Store, embedder and reranker are injected at construction and never change;
/// concurrent [`search`](Self::search) calls are independent.
pub struct QueryEngine {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
}

impl QueryEngine {
    /// Fails when the embedder is not the one the index was built with.
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
    ) -> SearchResult<Self> {
        if embedder.id() != store.embedder_id() {
            return Err(SearchError::EmbedderMismatch {
                embedder: embedder.id().to_string(),
                index: store.embedder_id().to_string(),
            });
        }
        if embedder.dimension() != store.dimension() {
            return Err(SearchError::DimensionMismatch {
                embedder: embedder.dimension(),
                index: store.dimension(),
            });
        }
        Ok(Self {
            store,
            embedder,
            reranker,
        })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn reranker(&self) -> &dyn Reranker {
        self.reranker.as_ref()
    }

    pub fn search(&self, request: &SearchRequest) -> SearchResult<Vec<SearchHit>> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if let Some(range) = request.years
            && range.is_inverted()
        {
            return Err(SearchError::InvalidYearRange(range));
        }
        if request.top_k == 0 || self.store.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut vector = self.embedder.embed(query)?;
        if vector.len() != self.store.dimension() {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: vector.len(),
            }
            .into());
        }
        l2_normalize(&mut vector);
        let embed_ms = started.elapsed().as_millis();

        let retrieved = self.store.query(&vector, request.top_k)?;
        let retrieved_count = retrieved.len();
        let hits: Vec<SearchHit> = retrieved
            .into_iter()
            .filter_map(|(row, score)| {
                self.store
                    .paper(row)
                    .map(|paper| SearchHit::from_paper(paper, row, score))
            })
            .collect();

        let hits = apply_year_filter(hits, request.years.as_ref());
        let hits = apply_keyword_filter(hits, &request.keywords);
        let filtered_count = hits.len();

        let mut hits = if request.rerank {
            self.rerank(query, hits)
        } else {
            hits
        };
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }

        debug!(
            embed_ms = embed_ms as u64,
            total_ms = started.elapsed().as_millis() as u64,
            retrieved = retrieved_count,
            after_filters = filtered_count,
            reranked = hits.first().is_some_and(|h| h.rerank_score.is_some()),
            "search complete"
        );
        Ok(hits)
    }

    /// Score every survivor in one batch and stable-sort by the new score.
    ///
    /// Any failure leaves `hits` in similarity order.
    fn rerank(&self, query: &str, mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
        if hits.is_empty() || !self.reranker.is_available() {
            return hits;
        }
        let passages: Vec<String> = hits.iter().map(SearchHit::rerank_passage).collect();
        let passage_refs: Vec<&str> = passages.iter().map(String::as_str).collect();

        match self.reranker.rerank(query, &passage_refs) {
            Ok(scores) if scores.len() == hits.len() => {
                for (hit, score) in hits.iter_mut().zip(scores) {
                    hit.rerank_score = Some(score);
                }
                hits.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
                hits
            }
            Ok(scores) => {
                warn!(
                    reranker = self.reranker.id(),
                    expected = hits.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores; keeping similarity order"
                );
                hits
            }
            Err(err) => {
                warn!(reranker = self.reranker.id(), error = %err, "rerank failed; keeping similarity order");
                hits
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Paper;
    use crate::search::builder::IndexBuilder;
    use crate::search::hash_embedder::HashEmbedder;
    use crate::search::reranker::{NoopReranker, RerankerError, RerankerResult};

    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> crate::search::embedder::EmbedderResult<Vec<f32>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.embed(text)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn id(&self) -> &str {
            self.inner.id()
        }

        fn is_semantic(&self) -> bool {
            false
        }
    }

    /// Scores passages by length, longest first.
    struct LengthReranker;

    impl Reranker for LengthReranker {
        fn rerank(&self, _query: &str, documents: &[&str]) -> RerankerResult<Vec<f32>> {
            Ok(documents.iter().map(|d| d.len() as f32).collect())
        }

        fn id(&self) -> &str {
            "length"
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    struct FailingReranker;

    impl Reranker for FailingReranker {
        fn rerank(&self, _query: &str, _documents: &[&str]) -> RerankerResult<Vec<f32>> {
            Err(RerankerError::RerankFailed("boom".into()))
        }

        fn id(&self) -> &str {
            "failing"
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn papers() -> Vec<Paper> {
        vec![
            Paper::new(0, "Neural machine translation", "Sequence models translate text.")
                .with_year(2018),
            Paper::new(1, "Transformers for NLP", "Attention based neural translation models.")
                .with_year(2021),
            Paper::new(2, "Neural translation at scale", "Scaling translation models with more data and longer training.")
                .with_year(2023),
        ]
    }

    fn store() -> Arc<IndexStore> {
        let built = IndexBuilder::new(Arc::new(HashEmbedder::new(128)))
            .build_in_memory(papers())
            .unwrap();
        Arc::new(IndexStore::from_parts(built.index, built.metadata).unwrap())
    }

    fn engine(reranker: Arc<dyn Reranker>) -> QueryEngine {
        QueryEngine::new(store(), Arc::new(HashEmbedder::new(128)), reranker).unwrap()
    }

    #[test]
    fn empty_query_fails_before_embedding() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new(128),
            calls: Default::default(),
        });
        let engine = QueryEngine::new(store(), embedder.clone(), Arc::new(NoopReranker::new())).unwrap();
        let err = engine.search(&SearchRequest::new("   ")).unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn inverted_year_range_is_rejected() {
        let engine = engine(Arc::new(NoopReranker::new()));
        let req = SearchRequest::new("translation").years(YearRange::new(2025, 2020));
        assert!(matches!(engine.search(&req), Err(SearchError::InvalidYearRange(_))));
    }

    #[test]
    fn embedder_mismatch_refuses_to_start() {
        let result = QueryEngine::new(store(), Arc::new(HashEmbedder::new(64)), Arc::new(NoopReranker::new()));
        assert!(matches!(result, Err(SearchError::EmbedderMismatch { .. })));
    }

    #[test]
    fn top_k_zero_is_empty() {
        let engine = engine(Arc::new(NoopReranker::new()));
        assert!(engine.search(&SearchRequest::new("translation").top_k(0)).unwrap().is_empty());
    }

    #[test]
    fn year_filter_excludes_old_papers() {
        let engine = engine(Arc::new(NoopReranker::new()));
        let req = SearchRequest::new("neural translation").years(YearRange::new(2020, 2025));
        let hits = engine.search(&req).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert!(!ids.contains(&0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
    }

    #[test]
    fn unavailable_reranker_keeps_similarity_order() {
        let engine = engine(Arc::new(NoopReranker::new()));
        let hits = engine.search(&SearchRequest::new("neural translation")).unwrap();
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.rerank_score.is_none()));
    }

    #[test]
    fn failing_reranker_keeps_similarity_order() {
        let base = engine(Arc::new(NoopReranker::new()))
            .search(&SearchRequest::new("neural translation"))
            .unwrap();
        let failing = engine(Arc::new(FailingReranker))
            .search(&SearchRequest::new("neural translation"))
            .unwrap();
        assert_eq!(base, failing);
    }

    #[test]
    fn reranker_reorders_by_its_scores() {
        let engine = engine(Arc::new(LengthReranker));
        let hits = engine.search(&SearchRequest::new("neural translation")).unwrap();
        assert_eq!(hits[0].id, 2);
        assert!(hits.iter().all(|h| h.rerank_score.is_some()));
        assert!(hits.windows(2).all(|w| w[0].rerank_score >= w[1].rerank_score));

        let no_rerank = engine
            .search(&SearchRequest::new("neural translation").rerank(false))
            .unwrap();
        assert!(no_rerank.iter().all(|h| h.rerank_score.is_none()));
    }

    #[test]
    fn keywords_are_and_combined() {
        let engine = engine(Arc::new(NoopReranker::new()));
        let req = SearchRequest::new("translation").keywords(["transformer", "nlp"]);
        let hits = engine.search(&req).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1]);

        let req = SearchRequest::new("translation").keywords(["transformer", "vision"]);
        assert!(engine.search(&req).unwrap().is_empty());
    }
}
