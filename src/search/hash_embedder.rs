//! FNV-1a feature hashing embedder.
//!
//! Not semantic: tokens are hashed into buckets with a sign bit, so documents
//! sharing words land close together. Always available and fully
//! deterministic, which makes it the fallback when no ONNX model is installed
//! and the embedder used throughout the test suite.

use super::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};

pub const HASH_EMBEDDER_ID_PREFIX: &str = "fnv1a";
pub const DEFAULT_HASH_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("{HASH_EMBEDDER_ID_PREFIX}-{dimension}"),
        }
    }

    pub fn default_dimension() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::default_dimension()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        if self.dimension == 0 {
            return Err(EmbedderError::InvalidInput("zero dimension".to_string()));
        }
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_encodes_dimension() {
        assert_eq!(HashEmbedder::default().id(), "fnv1a-384");
        assert_eq!(HashEmbedder::new(64).id(), "fnv1a-64");
    }

    #[test]
    fn embedding_is_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Attention is all you need").unwrap();
        let b = e.embed("Attention is all you need").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tokenization_ignores_case_and_punctuation() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Graph Neural Networks!").unwrap();
        let b = e.embed("graph, neural networks").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_empty_text_is_unit_norm() {
        let e = HashEmbedder::new(128);
        let v = e.embed("protein folding with deep learning").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::new(16);
        let v = e.embed("").unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_words_score_higher() {
        let e = HashEmbedder::new(256);
        let q = e.embed("time series forecasting").unwrap();
        let near = e.embed("forecasting time series with transformers").unwrap();
        let far = e.embed("protein structure prediction").unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&q, &near) > dot(&q, &far));
    }
}
