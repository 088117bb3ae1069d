//! Index builder: corpus + embedder → persisted artifact set.
//!
//! Every paper's `text` is embedded in batches (batches run on the rayon pool,
//! output order is preserved), L2-normalized, and written as a flat vector
//! index, the raw embedding matrix and a metadata table that all share one row
//! order. Artifacts are written into a staging directory beside the target and
//! swapped in with a rename, so readers see either the old set or the new one.

use std::collections::HashSet;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::model::types::Paper;
use crate::search::artifacts::{ArtifactPaths, Manifest, file_digest};
use crate::search::canonicalize::corpus_fingerprint;
use crate::search::embedder::{Embedder, ensure_dimension, l2_normalize};
use crate::search::embedding_matrix::EmbeddingMatrix;
use crate::search::metadata::MetadataTable;
use crate::search::vector_index::{Quantization, VectorIndex};

pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub quantization: Quantization,
    pub batch_size: usize,
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            quantization: Quantization::F32,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

/// What a build produced.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BuildReport {
    pub artifact_dir: PathBuf,
    pub count: usize,
    pub dimension: usize,
    pub embedder_id: String,
    pub quantization: String,
    pub fingerprint: String,
    pub elapsed_ms: u128,
}

/// In-memory result of embedding a corpus, before anything touches disk.
#[derive(Debug)]
pub struct BuiltIndex {
    pub index: VectorIndex,
    pub matrix: EmbeddingMatrix,
    pub metadata: MetadataTable,
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            options: BuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Embed and normalize `texts`, one vector per text in input order.
    pub fn embed_texts(&self, texts: &[&str], progress: Option<&ProgressBar>) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.options.batch_size.max(1);
        let dimension = self.embedder.dimension();

        let batches: Vec<Vec<Vec<f32>>> = texts
            .par_chunks(batch_size)
            .map(|chunk| {
                let mut vectors = self.embedder.embed_batch(chunk)?;
                if vectors.len() != chunk.len() {
                    return Err(anyhow!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        chunk.len()
                    ));
                }
                ensure_dimension(&vectors, dimension)?;
                for v in &mut vectors {
                    l2_normalize(v);
                }
                if let Some(pb) = progress {
                    pb.inc(chunk.len() as u64);
                }
                Ok(vectors)
            })
            .collect::<Result<_>>()?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Embed `papers` and assemble the index, matrix and metadata in memory.
    pub fn build_in_memory(&self, papers: Vec<Paper>) -> Result<BuiltIndex> {
        reject_duplicate_ids(&papers)?;

        let dimension = self.embedder.dimension();
        let embedder_id = self.embedder.id().to_string();
        let texts: Vec<&str> = papers.iter().map(|p| p.text.as_str()).collect();

        let progress = self.progress_bar(texts.len());
        let vectors = self.embed_texts(&texts, progress.as_ref())?;
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }

        let fingerprint = corpus_fingerprint(papers.iter().map(|p| (p.id, p.text.as_str())));
        let matrix = EmbeddingMatrix::from_rows(dimension, &vectors)?;
        let index = VectorIndex::build(
            embedder_id.clone(),
            dimension,
            self.options.quantization,
            papers.iter().map(|p| p.id).zip(vectors),
        )?;
        let metadata = MetadataTable::new(embedder_id, fingerprint, papers);

        Ok(BuiltIndex {
            index,
            matrix,
            metadata,
        })
    }

    /// Build and atomically install the artifact set at `paths`.
    pub fn build(&self, papers: Vec<Paper>, paths: &ArtifactPaths) -> Result<BuildReport> {
        let started = Instant::now();
        info!(
            docs = papers.len(),
            embedder = self.embedder.id(),
            target = %paths.dir().display(),
            "building index"
        );

        let built = self.build_in_memory(papers)?;
        let mut manifest = Manifest {
            embedder_id: built.metadata.header.embedder_id.clone(),
            dimension: built.index.dimension(),
            count: built.index.len(),
            quantization: self.options.quantization.as_str().to_string(),
            fingerprint: built.metadata.header.fingerprint.clone(),
            index_sha256: String::new(),
            embeddings_sha256: String::new(),
            built_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_artifacts(paths, &built, &mut manifest)?;

        let report = BuildReport {
            artifact_dir: paths.dir().to_path_buf(),
            count: manifest.count,
            dimension: manifest.dimension,
            embedder_id: manifest.embedder_id,
            quantization: manifest.quantization,
            fingerprint: manifest.fingerprint,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            docs = report.count,
            dimension = report.dimension,
            elapsed_ms = report.elapsed_ms as u64,
            "index built"
        );
        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.options.show_progress || !std::io::stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} embedding {eta}") {
            pb.set_style(style.progress_chars("██░"));
        }
        Some(pb)
    }
}

fn reject_duplicate_ids(papers: &[Paper]) -> Result<()> {
    let mut seen = HashSet::with_capacity(papers.len());
    for paper in papers {
        if !seen.insert(paper.id) {
            bail!("duplicate document id {} in corpus", paper.id);
        }
    }
    Ok(())
}

/// Write into a sibling staging dir, fsync, then swap it into place.
///
/// The manifest records digests of the staged index and matrix files.
fn write_artifacts(paths: &ArtifactPaths, built: &BuiltIndex, manifest: &mut Manifest) -> Result<()> {
    let target = paths.dir();
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

    let staging = tempfile::Builder::new()
        .prefix(".index-staging-")
        .tempdir_in(parent)
        .context("create staging directory")?;
    let staged = ArtifactPaths::new(staging.path());

    built.index.save(&staged.index())?;
    built.matrix.save(&staged.embeddings())?;
    built.metadata.save(&staged.metadata())?;
    manifest.index_sha256 = file_digest(&staged.index())?;
    manifest.embeddings_sha256 = file_digest(&staged.embeddings())?;
    manifest.save(&staged.manifest())?;
    debug!(staging = %staging.path().display(), "artifacts staged");

    let staging_path = staging.keep();
    let backup = parent.join(format!(".index-previous-{}", std::process::id()));
    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &backup)
            .with_context(|| format!("move previous index {} aside", target.display()))?;
    }
    if let Err(err) = fs::rename(&staging_path, target) {
        if had_previous && let Err(restore) = fs::rename(&backup, target) {
            warn!(
                backup = %backup.display(),
                error = %restore,
                "failed to restore previous index"
            );
        }
        discard_staging(&staging_path);
        return Err(err).with_context(|| format!("install index at {}", target.display()));
    }
    if had_previous {
        fs::remove_dir_all(&backup)
            .with_context(|| format!("remove previous index {}", backup.display()))?;
    }
    sync_dir(parent);
    Ok(())
}

fn discard_staging(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging) {
        warn!(staging = %staging.display(), error = %err, "failed to remove staging directory");
    }
}

/// Flush the rename to disk. Failure leaves a valid index, so it is only logged.
fn sync_dir(dir: &Path) {
    let result = fs::File::open(dir).and_then(|d| d.sync_all());
    if let Err(err) = result {
        warn!(dir = %dir.display(), error = %err, "failed to sync index directory");
    }
}
