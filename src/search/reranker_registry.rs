//! Reranker registry for model selection.
//!
//! This module provides a registry of available reranker backends that allows:
//! - Listing available rerankers with metadata
//! - Selecting reranker by name from CLI/config
//! - Validating model availability before use
//! - Falling back to the no-op reranker when nothing can be loaded
//!
//! # Supported Rerankers
//!
//! | Name | ID | Type | Notes |
//! |------|-----|------|-------|
//! | ms-marco | ms-marco-minilm-l6-v2 | Cross-encoder | Default |
//! | bge-reranker | bge-reranker-base | Cross-encoder | Higher quality, slower |
//! | jina-reranker-turbo | jina-reranker-v1-turbo-en | Cross-encoder | Fast, English |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use super::fastembed_reranker::FastEmbedReranker;
use super::reranker::{NoopReranker, Reranker, RerankerError, RerankerResult};

/// Default reranker name when none specified.
pub const DEFAULT_RERANKER: &str = "ms-marco";

/// Files required for any ONNX-based reranker.
pub const REQUIRED_ONNX_FILES: &[&str] = &[
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

/// Information about a registered reranker.
#[derive(Debug, Clone)]
pub struct RegisteredReranker {
    /// Short name for CLI/config (e.g., "ms-marco").
    pub name: &'static str,
    /// Unique reranker ID (e.g., "ms-marco-minilm-l6-v2").
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Directory name under `<data_dir>/models/`.
    pub model_dir_name: &'static str,
    /// HuggingFace model ID for download/reference.
    pub huggingface_id: &'static str,
}

impl RegisteredReranker {
    pub fn is_available(&self, data_dir: &Path) -> bool {
        self.missing_files(data_dir).is_empty()
    }

    pub fn model_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("models").join(self.model_dir_name)
    }

    pub fn missing_files(&self, data_dir: &Path) -> Vec<String> {
        let model_dir = self.model_dir(data_dir);
        REQUIRED_ONNX_FILES
            .iter()
            .filter(|f| !model_dir.join(f).is_file())
            .map(|f| (*f).to_string())
            .collect()
    }
}

/// Static registry of all supported rerankers, in preference order.
pub static RERANKERS: &[RegisteredReranker] = &[
    RegisteredReranker {
        name: "ms-marco",
        id: "ms-marco-minilm-l6-v2",
        description: "MS MARCO MiniLM L6 v2 - fast, high-quality cross-encoder",
        model_dir_name: "ms-marco-MiniLM-L-6-v2",
        huggingface_id: "cross-encoder/ms-marco-MiniLM-L-6-v2",
    },
    RegisteredReranker {
        name: "bge-reranker",
        id: "bge-reranker-base",
        description: "BGE Reranker base - higher quality, roughly 3x slower",
        model_dir_name: "bge-reranker-base",
        huggingface_id: "BAAI/bge-reranker-base",
    },
    RegisteredReranker {
        name: "jina-reranker-turbo",
        id: "jina-reranker-v1-turbo-en",
        description: "Jina Reranker v1 Turbo - fast, optimized for English",
        model_dir_name: "jina-reranker-v1-turbo-en",
        huggingface_id: "jinaai/jina-reranker-v1-turbo-en",
    },
];

/// Reranker registry with data directory context.
pub struct RerankerRegistry {
    data_dir: PathBuf,
}

impl RerankerRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn all(&self) -> &'static [RegisteredReranker] {
        RERANKERS
    }

    pub fn available(&self) -> Vec<&'static RegisteredReranker> {
        RERANKERS
            .iter()
            .filter(|r| r.is_available(&self.data_dir))
            .collect()
    }

    /// Get reranker info by name or id.
    pub fn get(&self, name: &str) -> Option<&'static RegisteredReranker> {
        let name_lower = name.to_ascii_lowercase();
        RERANKERS.iter().find(|r| {
            r.name == name_lower
                || r.id == name_lower
                || r.id.starts_with(&format!("{name_lower}-"))
        })
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.get(name)
            .map(|r| r.is_available(&self.data_dir))
            .unwrap_or(false)
    }

    /// First installed reranker in preference order.
    pub fn best_available(&self) -> Option<&'static RegisteredReranker> {
        RERANKERS.iter().find(|r| r.is_available(&self.data_dir))
    }

    /// Validate that a reranker is ready to use.
    pub fn validate(&self, name: &str) -> RerankerResult<&'static RegisteredReranker> {
        let reranker = self.get(name).ok_or_else(|| {
            RerankerError::Unavailable(format!(
                "unknown reranker '{}'. Available: {}",
                name,
                RERANKERS
                    .iter()
                    .map(|r| r.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        if !reranker.is_available(&self.data_dir) {
            return Err(RerankerError::Unavailable(format!(
                "reranker '{}' not available: missing files in {}: {}",
                name,
                reranker.model_dir(&self.data_dir).display(),
                reranker.missing_files(&self.data_dir).join(", ")
            )));
        }

        Ok(reranker)
    }
}

/// Load a reranker by name (or the best available if None).
pub fn get_reranker(data_dir: &Path, name: Option<&str>) -> RerankerResult<Arc<dyn Reranker>> {
    let registry = RerankerRegistry::new(data_dir);

    let reranker_info = match name {
        Some(n) => registry.validate(n)?,
        None => registry
            .best_available()
            .ok_or_else(|| RerankerError::Unavailable("no rerankers available".to_string()))?,
    };

    let reranker =
        FastEmbedReranker::load_from_dir(&reranker_info.model_dir(data_dir), reranker_info.id)?;
    Ok(Arc::new(reranker))
}

/// Load a reranker, degrading to [`NoopReranker`] when it cannot be built.
///
/// Missing or broken reranker models never fail a search; they only turn the
/// rerank step off.
pub fn get_reranker_or_noop(data_dir: &Path, name: Option<&str>) -> Arc<dyn Reranker> {
    match get_reranker(data_dir, name) {
        Ok(reranker) => reranker,
        Err(err) => {
            warn!(error = %err, "reranker unavailable; results keep similarity order");
            Arc::new(NoopReranker::with_reason(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_registry_get_by_name_and_id() {
        let tmp = tempdir().unwrap();
        let registry = RerankerRegistry::new(tmp.path());

        assert_eq!(registry.get("ms-marco").unwrap().id, "ms-marco-minilm-l6-v2");
        assert_eq!(registry.get("ms-marco-minilm-l6-v2").unwrap().name, "ms-marco");
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_rerankers_unavailable_without_files() {
        let tmp = tempdir().unwrap();
        let registry = RerankerRegistry::new(tmp.path());

        for r in registry.all() {
            assert!(!registry.is_available(r.name), "{} should be unavailable", r.name);
        }
        assert!(registry.best_available().is_none());
        assert!(registry.available().is_empty());
    }

    #[test]
    fn test_validate_unknown_reranker() {
        let tmp = tempdir().unwrap();
        let registry = RerankerRegistry::new(tmp.path());

        let err = registry.validate("nonexistent").unwrap_err();
        assert!(err.to_string().contains("unknown reranker"));
        assert!(err.to_string().contains("Available:"));
    }

    #[test]
    fn test_missing_files_listed() {
        let tmp = tempdir().unwrap();
        let registry = RerankerRegistry::new(tmp.path());
        let missing = registry.get("ms-marco").unwrap().missing_files(tmp.path());
        assert!(missing.contains(&"model.onnx".to_string()));
    }

    #[test]
    fn test_get_reranker_or_noop_degrades() {
        let tmp = tempdir().unwrap();
        let reranker = get_reranker_or_noop(tmp.path(), Some("ms-marco"));
        assert!(!reranker.is_available());
        assert_eq!(reranker.id(), "none");
    }

    #[test]
    fn test_partial_install_still_degrades() {
        let tmp = tempdir().unwrap();
        let registry = RerankerRegistry::new(tmp.path());
        let dir = registry.get("ms-marco").unwrap().model_dir(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.onnx"), b"not a model").unwrap();

        let reranker = get_reranker_or_noop(tmp.path(), None);
        assert!(!reranker.is_available());
    }
}
