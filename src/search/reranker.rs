//! Reranker trait for cross-encoder reranking of search results.
//!
//! A reranker scores `(query, candidate)` pairs jointly, which is slower than
//! vector similarity but more precise. The query engine holds one reranker
//! chosen at construction; when no model is installed it holds a
//! [`NoopReranker`] and skips the rerank step.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RerankerError {
    #[error("reranker unavailable: {0}")]
    Unavailable(String),
    #[error("rerank failed: {0}")]
    RerankFailed(String),
}

pub type RerankerResult<T> = Result<T, RerankerError>;

pub trait Reranker: Send + Sync {
    /// Score every document against `query` in one batch.
    ///
    /// Returns one score per document, in input order. Higher is more relevant.
    fn rerank(&self, query: &str, documents: &[&str]) -> RerankerResult<Vec<f32>>;

    fn id(&self) -> &str;

    /// Whether calling [`Reranker::rerank`] can produce scores.
    fn is_available(&self) -> bool;
}

/// Stand-in used when no reranker model could be loaded.
#[derive(Debug, Clone, Default)]
pub struct NoopReranker {
    reason: Option<String>,
}

impl NoopReranker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record why the real reranker is missing, for status output.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl Reranker for NoopReranker {
    fn rerank(&self, _query: &str, _documents: &[&str]) -> RerankerResult<Vec<f32>> {
        Err(RerankerError::Unavailable(
            self.reason
                .clone()
                .unwrap_or_else(|| "no reranker configured".to_string()),
        ))
    }

    fn id(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }
}
