//! Model and index detection plus engine wiring (local files only).
//!
//! This module turns a [`Config`] into a ready [`QueryEngine`]:
//! - picks the embedder recorded in the index header, so queries are embedded
//!   by the model that built the index
//! - loads the reranker, degrading to the no-op reranker when it is missing
//! - reports availability states for `status` without loading anything heavy
//!
//! It does **not** download models. Missing files are surfaced as states.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::search::artifacts::Manifest;
use crate::search::embedder::Embedder;
use crate::search::embedder_registry::{EmbedderRegistry, find_embedder, get_embedder, get_embedder_for_id};
use crate::search::query::QueryEngine;
use crate::search::reranker::{NoopReranker, Reranker};
use crate::search::reranker_registry::{RerankerRegistry, get_reranker_or_noop};
use crate::search::store::IndexStore;

/// What `search` would be able to do right now.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchAvailability {
    /// Index present and built with a semantic model that is installed.
    Ready { embedder_id: String },
    /// Index present and built with the hash embedder.
    HashFallback { embedder_id: String },
    /// No complete artifact set.
    IndexMissing {
        index_dir: PathBuf,
        missing: Vec<PathBuf>,
    },
    /// Index was built with a model whose files are gone.
    ModelMissing {
        embedder_id: String,
        model_dir: Option<PathBuf>,
        missing_files: Vec<String>,
    },
    /// Artifacts exist but could not be read.
    LoadFailed { context: String },
}

impl SearchAvailability {
    pub fn is_ready(&self) -> bool {
        matches!(self, SearchAvailability::Ready { .. })
    }

    pub fn can_search(&self) -> bool {
        matches!(
            self,
            SearchAvailability::Ready { .. } | SearchAvailability::HashFallback { .. }
        )
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            SearchAvailability::Ready { .. } => "SEM",
            SearchAvailability::HashFallback { .. } => "HASH",
            SearchAvailability::IndexMissing { .. } => "NOIDX",
            SearchAvailability::ModelMissing { .. } => "NOMODEL",
            SearchAvailability::LoadFailed { .. } => "ERR",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            SearchAvailability::Ready { embedder_id } => format!("semantic search ready ({embedder_id})"),
            SearchAvailability::HashFallback { embedder_id } => {
                format!("index uses hash embeddings ({embedder_id}); results are lexical")
            }
            SearchAvailability::IndexMissing { index_dir, missing } => format!(
                "index missing at {} ({} file(s) absent)",
                index_dir.display(),
                missing.len()
            ),
            SearchAvailability::ModelMissing {
                embedder_id,
                model_dir,
                missing_files,
            } => format!(
                "model for {embedder_id} missing at {}: {}",
                model_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "unknown".into()),
                missing_files.join(", ")
            ),
            SearchAvailability::LoadFailed { context } => format!("index load failed ({context})"),
        }
    }
}

/// Inspect artifacts and model files without loading models.
pub fn detect_availability(config: &Config) -> SearchAvailability {
    let paths = config.artifact_paths();
    let missing = paths.missing();
    if !missing.is_empty() {
        return SearchAvailability::IndexMissing {
            index_dir: paths.dir().to_path_buf(),
            missing,
        };
    }

    let manifest = match Manifest::load(&paths.manifest()) {
        Ok(m) => m,
        Err(err) => {
            return SearchAvailability::LoadFailed {
                context: format!("{err:#}"),
            };
        }
    };

    match find_embedder(&manifest.embedder_id) {
        Some(registered) if registered.is_semantic => {
            if registered.is_available(&config.data_dir) {
                SearchAvailability::Ready {
                    embedder_id: manifest.embedder_id,
                }
            } else {
                SearchAvailability::ModelMissing {
                    embedder_id: manifest.embedder_id,
                    model_dir: registered.model_dir(&config.data_dir),
                    missing_files: registered.missing_files(&config.data_dir),
                }
            }
        }
        Some(_) => SearchAvailability::HashFallback {
            embedder_id: manifest.embedder_id,
        },
        None if manifest.embedder_id.starts_with("fnv1a-") => SearchAvailability::HashFallback {
            embedder_id: manifest.embedder_id,
        },
        None => SearchAvailability::LoadFailed {
            context: format!("unknown embedder '{}'", manifest.embedder_id),
        },
    }
}

/// Embedder for a new build: the configured one, or the best installed model
/// with the hash embedder as the last resort.
pub fn resolve_build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedder.as_deref() {
        Some(name) => get_embedder(&config.data_dir, Some(name))
            .with_context(|| format!("load embedder '{name}'")),
        None => {
            let registry = EmbedderRegistry::new(&config.data_dir);
            let best = registry.best_available();
            if !best.is_semantic {
                warn!("no semantic model installed; building with the hash embedder");
            }
            get_embedder(&config.data_dir, Some(best.name))
                .with_context(|| format!("load embedder '{}'", best.name))
        }
    }
}

/// Reranker for queries, or the no-op reranker when disabled or missing.
pub fn resolve_reranker(config: &Config) -> Arc<dyn Reranker> {
    if !config.rerank {
        return Arc::new(NoopReranker::with_reason("reranking disabled"));
    }
    let registry = RerankerRegistry::new(&config.data_dir);
    if registry.get(&config.reranker).is_none() {
        warn!(reranker = %config.reranker, "unknown reranker; reranking disabled");
        return Arc::new(NoopReranker::with_reason(format!(
            "unknown reranker '{}'",
            config.reranker
        )));
    }
    get_reranker_or_noop(&config.data_dir, Some(&config.reranker))
}

/// Load the store and wire it to the matching embedder and a reranker.
pub fn load_engine(config: &Config) -> Result<QueryEngine> {
    let paths = config.artifact_paths();
    let store = Arc::new(
        IndexStore::open(&paths)
            .with_context(|| format!("open index at {}", paths.dir().display()))?,
    );
    let embedder = get_embedder_for_id(&config.data_dir, store.embedder_id())
        .with_context(|| format!("load embedder '{}' recorded in the index", store.embedder_id()))?;
    let reranker = resolve_reranker(config);
    info!(
        rows = store.len(),
        embedder = embedder.id(),
        reranker = reranker.id(),
        rerank_available = reranker.is_available(),
        "query engine ready"
    );
    Ok(QueryEngine::new(store, embedder, reranker)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Paper;
    use crate::search::builder::IndexBuilder;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn missing_index_is_reported() {
        let tmp = tempdir().unwrap();
        let availability = detect_availability(&config_in(tmp.path()));
        assert!(matches!(availability, SearchAvailability::IndexMissing { ref missing, .. } if missing.len() == 4));
        assert!(!availability.can_search());
        assert_eq!(availability.status_label(), "NOIDX");
    }

    #[test]
    fn build_embedder_falls_back_to_hash() {
        let tmp = tempdir().unwrap();
        let embedder = resolve_build_embedder(&config_in(tmp.path())).unwrap();
        assert!(!embedder.is_semantic());
        assert!(embedder.id().starts_with("fnv1a-"));
    }

    #[test]
    fn explicit_missing_model_is_an_error() {
        let tmp = tempdir().unwrap();
        let config = Config {
            embedder: Some("minilm".into()),
            ..config_in(tmp.path())
        };
        assert!(resolve_build_embedder(&config).is_err());
    }

    #[test]
    fn disabled_rerank_uses_noop() {
        let tmp = tempdir().unwrap();
        let config = Config {
            rerank: false,
            ..config_in(tmp.path())
        };
        assert!(!resolve_reranker(&config).is_available());
    }

    #[test]
    fn hash_index_loads_into_engine() {
        let tmp = tempdir().unwrap();
        let config = config_in(tmp.path());
        let embedder = resolve_build_embedder(&config).unwrap();
        IndexBuilder::new(embedder)
            .build(vec![Paper::new(0, "Sparse attention", "Long documents.")], &config.artifact_paths())
            .unwrap();

        let availability = detect_availability(&config);
        assert!(matches!(availability, SearchAvailability::HashFallback { .. }));

        let engine = load_engine(&config).unwrap();
        assert_eq!(engine.store().len(), 1);
        assert!(!engine.reranker().is_available());
    }
}
