//! Loaded, read-only index plus its metadata table.
//!
//! A store is created once per process and shared behind an `Arc`. Loading
//! cross-checks the artifacts against each other; any disagreement is a
//! configuration error, never something to paper over at query time.

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::model::types::Paper;
use crate::search::artifacts::{ArtifactPaths, Manifest, file_digest};
use crate::search::embedding_matrix::EmbeddingMatrix;
use crate::search::metadata::MetadataTable;
use crate::search::vector_index::{PsviHeader, VectorIndex};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing index artifact: {}", .0.display())]
    MissingArtifact(PathBuf),
    #[error("corrupt artifact {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("row count mismatch: index has {index} rows, {other} has {actual}")]
    CountMismatch {
        index: usize,
        other: &'static str,
        actual: usize,
    },
    #[error("row {row} is misaligned: index holds id {index_id}, metadata holds id {metadata_id}")]
    RowMisaligned {
        row: usize,
        index_id: u64,
        metadata_id: u64,
    },
    #[error("embedder mismatch: index was built with '{index}', {other} says '{actual}'")]
    EmbedderMismatch {
        index: String,
        other: &'static str,
        actual: String,
    },
    #[error("dimension mismatch: index has {index}, {other} has {actual}")]
    DimensionMismatch {
        index: usize,
        other: &'static str,
        actual: usize,
    },
    #[error("{artifact} belongs to a different build: expected {expected}, found {actual}")]
    FingerprintMismatch {
        artifact: &'static str,
        expected: String,
        actual: String,
    },
    #[error("query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub struct IndexStore {
    index: VectorIndex,
    metadata: MetadataTable,
    manifest: Option<Manifest>,
}

impl IndexStore {
    /// Load an index and its metadata table, checking that rows line up.
    pub fn load(index_path: &Path, metadata_path: &Path) -> StoreResult<Self> {
        let started = Instant::now();
        for path in [index_path, metadata_path] {
            if !path.is_file() {
                return Err(StoreError::MissingArtifact(path.to_path_buf()));
            }
        }

        let index = VectorIndex::load(index_path).map_err(|e| corrupt(index_path, e))?;
        let metadata = MetadataTable::load(metadata_path).map_err(|e| corrupt(metadata_path, e))?;
        let store = Self::from_parts(index, metadata)?;
        info!(
            rows = store.len(),
            embedder = store.embedder_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index store loaded"
        );
        Ok(store)
    }

    /// Load the full artifact set from `paths`, including the manifest and a
    /// shape check of the embedding matrix.
    pub fn open(paths: &ArtifactPaths) -> StoreResult<Self> {
        if let Some(missing) = paths.missing().into_iter().next() {
            return Err(StoreError::MissingArtifact(missing));
        }
        let mut store = Self::load(&paths.index(), &paths.metadata())?;

        let manifest_path = paths.manifest();
        let manifest = Manifest::load(&manifest_path).map_err(|e| corrupt(&manifest_path, e))?;
        if manifest.fingerprint != store.fingerprint() {
            return Err(StoreError::FingerprintMismatch {
                artifact: "manifest",
                expected: store.fingerprint().to_string(),
                actual: manifest.fingerprint,
            });
        }
        verify_digest(&paths.index(), "index", &manifest.index_sha256)?;
        verify_digest(&paths.embeddings(), "embedding matrix", &manifest.embeddings_sha256)?;
        if manifest.count != store.len() {
            return Err(StoreError::CountMismatch {
                index: store.len(),
                other: "manifest",
                actual: manifest.count,
            });
        }
        if manifest.embedder_id != store.embedder_id() {
            return Err(StoreError::EmbedderMismatch {
                index: store.embedder_id().to_string(),
                other: "manifest",
                actual: manifest.embedder_id,
            });
        }
        if manifest.dimension != store.dimension() {
            return Err(StoreError::DimensionMismatch {
                index: store.dimension(),
                other: "manifest",
                actual: manifest.dimension,
            });
        }

        let matrix = Self::load_embeddings(&paths.embeddings())?;
        if matrix.rows() != store.len() {
            return Err(StoreError::CountMismatch {
                index: store.len(),
                other: "embedding matrix",
                actual: matrix.rows(),
            });
        }
        if matrix.dimension() != store.dimension() {
            return Err(StoreError::DimensionMismatch {
                index: store.dimension(),
                other: "embedding matrix",
                actual: matrix.dimension(),
            });
        }

        store.manifest = Some(manifest);
        Ok(store)
    }

    /// Read the raw embedding matrix.
    pub fn load_embeddings(path: &Path) -> StoreResult<EmbeddingMatrix> {
        if !path.is_file() {
            return Err(StoreError::MissingArtifact(path.to_path_buf()));
        }
        EmbeddingMatrix::load(path).map_err(|e| corrupt(path, e))
    }

    /// Assemble a store from in-memory parts with the same checks as [`load`](Self::load).
    pub fn from_parts(index: VectorIndex, metadata: MetadataTable) -> StoreResult<Self> {
        if index.len() != metadata.len() {
            return Err(StoreError::CountMismatch {
                index: index.len(),
                other: "metadata",
                actual: metadata.len(),
            });
        }
        if index.embedder_id() != metadata.header.embedder_id {
            return Err(StoreError::EmbedderMismatch {
                index: index.embedder_id().to_string(),
                other: "metadata",
                actual: metadata.header.embedder_id.clone(),
            });
        }
        for (row, (index_id, metadata_id)) in index.doc_ids().iter().zip(metadata.ids()).enumerate() {
            if *index_id != metadata_id {
                return Err(StoreError::RowMisaligned {
                    row,
                    index_id: *index_id,
                    metadata_id,
                });
            }
        }
        Ok(Self {
            index,
            metadata,
            manifest: None,
        })
    }

    /// Top `k` rows by cosine similarity, best first, ties by ascending row.
    pub fn query(&self, vector: &[f32], k: usize) -> StoreResult<Vec<(usize, f32)>> {
        let n = self.len();
        let results = self
            .index
            .search_top_k(vector, k.min(n))
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(results
            .into_iter()
            .filter(|r| r.row < n)
            .map(|r| (r.row, r.score))
            .collect())
    }

    pub fn paper(&self, row: usize) -> Option<&Paper> {
        self.metadata.get(row)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn embedder_id(&self) -> &str {
        self.index.embedder_id()
    }

    pub fn header(&self) -> &PsviHeader {
        self.index.header()
    }

    pub fn fingerprint(&self) -> &str {
        &self.metadata.header.fingerprint
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }
}

fn verify_digest(path: &Path, artifact: &'static str, expected: &str) -> StoreResult<()> {
    let actual = file_digest(path).map_err(|e| corrupt(path, e))?;
    if actual != expected {
        return Err(StoreError::FingerprintMismatch {
            artifact,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn corrupt(path: &Path, err: anyhow::Error) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::vector_index::Quantization;

    fn unit_index(ids: &[u64]) -> VectorIndex {
        let entries = ids.iter().enumerate().map(|(i, id)| {
            let mut v = vec![0.0; 4];
            v[i % 4] = 1.0;
            (*id, v)
        });
        VectorIndex::build("test-4", 4, Quantization::F32, entries).unwrap()
    }

    fn table(ids: &[u64]) -> MetadataTable {
        let papers = ids.iter().map(|id| Paper::new(*id, format!("p{id}"), "")).collect();
        MetadataTable::new("test-4", "fp", papers)
    }

    #[test]
    fn store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IndexStore>();
    }

    #[test]
    fn from_parts_rejects_misaligned_rows() {
        let err = IndexStore::from_parts(unit_index(&[1, 2]), table(&[2, 1])).unwrap_err();
        assert!(matches!(err, StoreError::RowMisaligned { row: 0, index_id: 1, metadata_id: 2 }));
    }

    #[test]
    fn from_parts_rejects_count_mismatch() {
        let err = IndexStore::from_parts(unit_index(&[1, 2]), table(&[1])).unwrap_err();
        assert!(matches!(err, StoreError::CountMismatch { index: 2, actual: 1, .. }));
    }

    #[test]
    fn from_parts_rejects_embedder_mismatch() {
        let mut metadata = table(&[1]);
        metadata.header.embedder_id = "other".into();
        let err = IndexStore::from_parts(unit_index(&[1]), metadata).unwrap_err();
        assert!(matches!(err, StoreError::EmbedderMismatch { .. }));
    }

    #[test]
    fn query_bounds_and_orders_results() -> StoreResult<()> {
        let store = IndexStore::from_parts(unit_index(&[7, 8, 9]), table(&[7, 8, 9]))?;
        let hits = store.query(&[0.0, 1.0, 0.0, 0.0], 10)?;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0], (1, 1.0));
        assert!(hits.iter().all(|(row, _)| *row < store.len()));
        assert_eq!(store.paper(1).map(|p| p.id), Some(8));
        Ok(())
    }

    #[test]
    fn query_with_huge_k_returns_every_row() -> StoreResult<()> {
        let store = IndexStore::from_parts(unit_index(&[7, 8, 9]), table(&[7, 8, 9]))?;
        assert_eq!(store.query(&[1.0, 0.0, 0.0, 0.0], 1 << 40)?.len(), 3);
        assert_eq!(store.query(&[1.0, 0.0, 0.0, 0.0], usize::MAX)?.len(), 3);
        Ok(())
    }

    #[test]
    fn load_reports_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let err = IndexStore::open(&ArtifactPaths::new(tmp.path())).unwrap_err();
        assert!(matches!(err, StoreError::MissingArtifact(_)));
    }
}
