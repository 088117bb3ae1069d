//! Embedder trait shared by the hash and ML backends.
//!
//! Every embedder maps text to a fixed-length vector. Implementations must be
//! deterministic for a given model revision: the index builder and the query
//! engine rely on the same text always producing the same vector.

use thiserror::Error;

/// Norm floor used by [`l2_normalize`]. Only exact-zero vectors fall below it.
pub const NORM_EPSILON: f32 = 1e-12;

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Lightweight description of an embedder for display and manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderInfo {
    pub id: String,
    pub dimension: usize,
    pub is_semantic: bool,
}

pub trait Embedder: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Embed many texts, preserving input order.
    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Stable identifier persisted in index headers (e.g. `minilm-384`).
    fn id(&self) -> &str;

    /// Whether the vectors carry semantic meaning (false for hashing).
    fn is_semantic(&self) -> bool;

    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            id: self.id().to_string(),
            dimension: self.dimension(),
            is_semantic: self.is_semantic(),
        }
    }
}

/// Scale `vector` to unit length in place: `v / max(||v||, NORM_EPSILON)`.
///
/// An all-zero vector stays all-zero instead of turning into NaNs.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPSILON);
    for v in vector.iter_mut() {
        *v /= denom;
    }
}

/// Owned variant of [`l2_normalize`].
pub fn l2_normalized(mut vector: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut vector);
    vector
}

/// Check that every vector in `vectors` has `expected` components.
pub fn ensure_dimension(vectors: &[Vec<f32>], expected: usize) -> EmbedderResult<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbedderError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(())
}
