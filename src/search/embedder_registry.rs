//! Embedder registry for model selection.
//!
//! This module provides a registry of available embedding backends that allows:
//! - Listing available embedders with metadata
//! - Selecting embedder by name from CLI/config
//! - Validating model availability before use
//! - Providing a sensible default model
//!
//! # Supported Embedders
//!
//! | Name | ID | Dimension | Type | Notes |
//! |------|-----|-----------|------|-------|
//! | minilm | minilm-384 | 384 | ML | Default semantic embedder |
//! | bge-small | bge-small-384 | 384 | ML | BGE small English v1.5 |
//! | hash | fnv1a-384 | 384 | Hash | Always available fallback |
//!
//! # Example
//!
//! ```ignore
//! use paper_search::search::embedder_registry::{EmbedderRegistry, get_embedder};
//!
//! let registry = EmbedderRegistry::new(&data_dir);
//! for info in registry.available() {
//!     println!("{}: {} ({})", info.name, info.id, info.dimension);
//! }
//! let embedder = get_embedder(&data_dir, Some("minilm"))?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::embedder::{Embedder, EmbedderError, EmbedderInfo, EmbedderResult};
use super::fastembed_embedder::FastEmbedder;
use super::hash_embedder::HashEmbedder;

/// Default embedder name when none specified.
pub const DEFAULT_EMBEDDER: &str = "minilm";

/// Hash embedder name (always available).
pub const HASH_EMBEDDER: &str = "hash";

/// Files required for any ONNX-based embedder.
pub const REQUIRED_ONNX_FILES: &[&str] = &[
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

/// Information about a registered embedder.
#[derive(Debug, Clone)]
pub struct RegisteredEmbedder {
    /// Short name for CLI/config (e.g., "minilm", "hash").
    pub name: &'static str,
    /// Unique embedder ID persisted in index headers (e.g., "minilm-384").
    pub id: &'static str,
    /// Output dimension.
    pub dimension: usize,
    /// Whether this is a semantic (ML) embedder.
    pub is_semantic: bool,
    /// Human-readable description.
    pub description: &'static str,
    /// Whether the model files are required (false = always available).
    pub requires_model_files: bool,
    /// Directory name under `<data_dir>/models/`.
    pub model_dir_name: &'static str,
    /// HuggingFace model ID for download/reference.
    pub huggingface_id: &'static str,
}

impl RegisteredEmbedder {
    /// Check if this embedder is available in the given data directory.
    pub fn is_available(&self, data_dir: &Path) -> bool {
        if !self.requires_model_files {
            return true;
        }
        self.missing_files(data_dir).is_empty()
    }

    /// Get the model directory path for this embedder (if applicable).
    pub fn model_dir(&self, data_dir: &Path) -> Option<PathBuf> {
        if !self.requires_model_files {
            return None;
        }
        Some(data_dir.join("models").join(self.model_dir_name))
    }

    /// Get missing model files for this embedder.
    pub fn missing_files(&self, data_dir: &Path) -> Vec<String> {
        match self.model_dir(data_dir) {
            Some(model_dir) => REQUIRED_ONNX_FILES
                .iter()
                .filter(|f| !model_dir.join(f).is_file())
                .map(|f| (*f).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            id: self.id.to_string(),
            dimension: self.dimension,
            is_semantic: self.is_semantic,
        }
    }
}

/// Static registry of all supported embedders, in preference order.
pub static EMBEDDERS: &[RegisteredEmbedder] = &[
    RegisteredEmbedder {
        name: "minilm",
        id: "minilm-384",
        dimension: 384,
        is_semantic: true,
        description: "MiniLM L6 v2 - fast, high-quality semantic embeddings",
        requires_model_files: true,
        model_dir_name: "all-MiniLM-L6-v2",
        huggingface_id: "sentence-transformers/all-MiniLM-L6-v2",
    },
    RegisteredEmbedder {
        name: "bge-small",
        id: "bge-small-384",
        dimension: 384,
        is_semantic: true,
        description: "BGE small English v1.5 - strong retrieval quality at MiniLM size",
        requires_model_files: true,
        model_dir_name: "bge-small-en-v1.5",
        huggingface_id: "BAAI/bge-small-en-v1.5",
    },
    RegisteredEmbedder {
        name: "hash",
        id: "fnv1a-384",
        dimension: 384,
        is_semantic: false,
        description: "FNV-1a feature hashing - lexical fallback, always available",
        requires_model_files: false,
        model_dir_name: "",
        huggingface_id: "",
    },
];

/// Embedder registry with data directory context.
pub struct EmbedderRegistry {
    data_dir: PathBuf,
}

impl EmbedderRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn all(&self) -> &'static [RegisteredEmbedder] {
        EMBEDDERS
    }

    /// Get only available embedders (model files present).
    pub fn available(&self) -> Vec<&'static RegisteredEmbedder> {
        EMBEDDERS
            .iter()
            .filter(|e| e.is_available(&self.data_dir))
            .collect()
    }

    /// Get embedder info by name or id.
    pub fn get(&self, name: &str) -> Option<&'static RegisteredEmbedder> {
        find_embedder(name)
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.get(name)
            .map(|e| e.is_available(&self.data_dir))
            .unwrap_or(false)
    }

    /// Get the best available embedder (ML if available, hash fallback).
    pub fn best_available(&self) -> &'static RegisteredEmbedder {
        EMBEDDERS
            .iter()
            .filter(|e| e.is_semantic)
            .find(|e| e.is_available(&self.data_dir))
            .unwrap_or_else(hash_entry)
    }

    /// Validate that an embedder is ready to use.
    pub fn validate(&self, name: &str) -> EmbedderResult<&'static RegisteredEmbedder> {
        let embedder = self.get(name).ok_or_else(|| {
            EmbedderError::Unavailable(format!(
                "unknown embedder '{}'. Available: {}",
                name,
                EMBEDDERS
                    .iter()
                    .map(|e| e.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        if !embedder.is_available(&self.data_dir) {
            let missing = embedder.missing_files(&self.data_dir);
            let model_dir = embedder
                .model_dir(&self.data_dir)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            return Err(EmbedderError::Unavailable(format!(
                "embedder '{}' not available: missing files in {}: {}",
                name,
                model_dir,
                missing.join(", ")
            )));
        }

        Ok(embedder)
    }
}

/// Look up a registered embedder by short name, full id, or id prefix.
pub fn find_embedder(name: &str) -> Option<&'static RegisteredEmbedder> {
    let name_lower = name.to_ascii_lowercase();
    EMBEDDERS.iter().find(|e| {
        e.name == name_lower || e.id == name_lower || e.id.starts_with(&format!("{name_lower}-"))
    })
}

fn hash_entry() -> &'static RegisteredEmbedder {
    // EMBEDDERS always ends with the hash entry.
    &EMBEDDERS[EMBEDDERS.len() - 1]
}

/// Load an embedder by name (or the best available if None).
pub fn get_embedder(data_dir: &Path, name: Option<&str>) -> EmbedderResult<Arc<dyn Embedder>> {
    let registry = EmbedderRegistry::new(data_dir);

    let embedder_info = match name {
        Some(n) => registry.validate(n)?,
        None => registry.best_available(),
    };

    load_embedder_by_name(data_dir, embedder_info.name)
}

/// Load the embedder whose persisted id is `embedder_id`, as recorded in an
/// index header. Used at query time so the query is embedded by the model that
/// built the index.
pub fn get_embedder_for_id(data_dir: &Path, embedder_id: &str) -> EmbedderResult<Arc<dyn Embedder>> {
    if let Some(dimension) = embedder_id
        .strip_prefix("fnv1a-")
        .and_then(|d| d.parse::<usize>().ok())
    {
        return Ok(Arc::new(HashEmbedder::new(dimension)));
    }
    let registered = EMBEDDERS
        .iter()
        .find(|e| e.id == embedder_id)
        .ok_or_else(|| {
            EmbedderError::Unavailable(format!("index was built with unknown embedder '{embedder_id}'"))
        })?;
    get_embedder(data_dir, Some(registered.name))
}

fn load_embedder_by_name(data_dir: &Path, name: &str) -> EmbedderResult<Arc<dyn Embedder>> {
    match name {
        HASH_EMBEDDER => Ok(Arc::new(HashEmbedder::default())),
        "minilm" | "bge-small" => {
            let embedder = FastEmbedder::load_by_name(data_dir, name)?;
            Ok(Arc::new(embedder))
        }
        _ => Err(EmbedderError::Unavailable(format!(
            "embedder '{name}' not implemented"
        ))),
    }
}
