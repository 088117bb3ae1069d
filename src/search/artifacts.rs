//! Artifact directory layout and manifest.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const INDEX_FILE: &str = "index.psvi";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const METADATA_FILE: &str = "metadata.msgpack";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Paths of the four files that make up one built index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location under the data directory.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("index"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn embeddings(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILE)
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Files that are absent on disk.
    pub fn missing(&self) -> Vec<PathBuf> {
        [self.index(), self.embeddings(), self.metadata(), self.manifest()]
            .into_iter()
            .filter(|p| !p.is_file())
            .collect()
    }

    pub fn exists(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Summary written next to the binary artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub embedder_id: String,
    pub dimension: usize,
    pub count: usize,
    pub quantization: String,
    pub fingerprint: String,
    /// SHA256 of `index.psvi` as written by the build.
    pub index_sha256: String,
    /// SHA256 of `embeddings.npy` as written by the build.
    pub embeddings_sha256: String,
    pub built_at: DateTime<Utc>,
    pub tool_version: String,
}

impl Manifest {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("serialize manifest")?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}

/// Hex SHA256 of a file's bytes, read in chunks.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
