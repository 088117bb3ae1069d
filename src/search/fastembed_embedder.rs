//! FastEmbed-backed ONNX embedder (MiniLM and friends).
//!
//! Models are loaded from local files only; nothing is downloaded here. The
//! expected layout is `<data_dir>/models/<model-dir>/` containing the files in
//! [`REQUIRED_ONNX_FILES`](super::embedder_registry::REQUIRED_ONNX_FILES).

use std::fs;
use std::path::{Path, PathBuf};

use fastembed::{
    InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::embedder::{Embedder, EmbedderError, EmbedderResult, ensure_dimension};
use super::embedder_registry::EMBEDDERS;

const MINILM_ID: &str = "minilm-384";
const MINILM_DIMENSION: usize = 384;
const MINILM_DIR: &str = "all-MiniLM-L6-v2";

/// Texts per ONNX session call.
const FASTEMBED_BATCH_SIZE: usize = 32;

pub struct FastEmbedder {
    // The ONNX session needs exclusive access during inference.
    model: Mutex<TextEmbedding>,
    id: String,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("id", &self.id)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedder {
    pub fn default_model_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("models").join(MINILM_DIR)
    }

    /// Load the default MiniLM model from `model_dir`.
    pub fn load_from_dir(model_dir: &Path) -> EmbedderResult<Self> {
        Self::load_with(model_dir, MINILM_ID, MINILM_DIMENSION)
    }

    /// Load a registered ONNX embedder by its short name.
    pub fn load_by_name(data_dir: &Path, name: &str) -> EmbedderResult<Self> {
        let registered = EMBEDDERS
            .iter()
            .find(|e| e.name == name && e.requires_model_files)
            .ok_or_else(|| EmbedderError::Unavailable(format!("unknown ONNX embedder: {name}")))?;
        let model_dir = registered.model_dir(data_dir).ok_or_else(|| {
            EmbedderError::Unavailable(format!("no model dir for embedder: {name}"))
        })?;
        Self::load_with(&model_dir, registered.id, registered.dimension)
    }

    fn load_with(model_dir: &Path, id: &str, dimension: usize) -> EmbedderResult<Self> {
        let read = |file: &str| -> EmbedderResult<Vec<u8>> {
            let path = model_dir.join(file);
            fs::read(&path).map_err(|e| {
                EmbedderError::Unavailable(format!("read {}: {e}", path.display()))
            })
        };

        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: read("config.json")?,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        };
        let user_model = UserDefinedEmbeddingModel::new(read("model.onnx")?, tokenizer_files)
            .with_pooling(Pooling::Mean);

        let model =
            TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
                .map_err(|e| EmbedderError::Unavailable(format!("fastembed init: {e}")))?;

        info!(embedder = id, model_dir = %model_dir.display(), "loaded fastembed model");
        Ok(Self {
            model: Mutex::new(model),
            id: id.to_string(),
            dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::EmbeddingFailed("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(embedder = %self.id, batch = texts.len(), "fastembed batch");
        let mut model = self.model.lock();
        let vectors = model
            .embed(texts.to_vec(), Some(FASTEMBED_BATCH_SIZE))
            .map_err(|e| EmbedderError::EmbeddingFailed(e.to_string()))?;
        drop(model);

        if vectors.len() != texts.len() {
            return Err(EmbedderError::EmbeddingFailed(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        ensure_dimension(&vectors, self.dimension)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        true
    }
}
