//! FastEmbed-backed cross-encoder reranker (ms-marco-MiniLM-L-6-v2 by default).

use std::fs;
use std::path::Path;

use fastembed::{RerankInitOptionsUserDefined, TextRerank, TokenizerFiles, UserDefinedRerankingModel};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::reranker::{Reranker, RerankerError, RerankerResult};

const RERANK_BATCH_SIZE: usize = 32;

pub struct FastEmbedReranker {
    model: Mutex<TextRerank>,
    id: String,
}

impl std::fmt::Debug for FastEmbedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedReranker")
            .field("id", &self.id)
            .finish()
    }
}

impl FastEmbedReranker {
    /// Load a cross-encoder from a local ONNX model directory.
    pub fn load_from_dir(model_dir: &Path, id: &str) -> RerankerResult<Self> {
        let read = |file: &str| -> RerankerResult<Vec<u8>> {
            let path = model_dir.join(file);
            fs::read(&path)
                .map_err(|e| RerankerError::Unavailable(format!("read {}: {e}", path.display())))
        };

        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: read("config.json")?,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        };
        let user_model = UserDefinedRerankingModel::new(read("model.onnx")?, tokenizer_files);
        let model = TextRerank::try_new_from_user_defined(
            user_model,
            RerankInitOptionsUserDefined::default(),
        )
        .map_err(|e| RerankerError::Unavailable(format!("fastembed rerank init: {e}")))?;

        info!(reranker = id, model_dir = %model_dir.display(), "loaded cross-encoder");
        Ok(Self {
            model: Mutex::new(model),
            id: id.to_string(),
        })
    }
}

impl Reranker for FastEmbedReranker {
    fn rerank(&self, query: &str, documents: &[&str]) -> RerankerResult<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        debug!(reranker = %self.id, docs = documents.len(), "cross-encoder batch");

        let mut model = self.model.lock();
        let results = model
            .rerank(query, documents.to_vec(), false, Some(RERANK_BATCH_SIZE))
            .map_err(|e| RerankerError::RerankFailed(e.to_string()))?;
        drop(model);

        // fastembed returns results sorted by score; put them back in input order.
        let mut scores = vec![None; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = Some(result.score);
            }
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(idx, score)| {
                score.ok_or_else(|| {
                    RerankerError::RerankFailed(format!("no score returned for document {idx}"))
                })
            })
            .collect()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_without_files_is_unavailable() {
        let tmp = tempdir().unwrap();
        let err = FastEmbedReranker::load_from_dir(tmp.path(), "ms-marco-minilm-l6-v2").unwrap_err();
        assert!(matches!(err, RerankerError::Unavailable(_)));
        assert!(err.to_string().contains("tokenizer.json"));
    }
}
