//! Metadata table persisted alongside the vector index.
//!
//! Rows are stored in matrix order: row `i` here describes vector `i` in the
//! index and in the embedding matrix. Encoded as MessagePack with `rmp-serde`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::model::types::Paper;

pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    pub version: u32,
    pub count: usize,
    pub embedder_id: String,
    /// See [`crate::search::canonicalize::corpus_fingerprint`].
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTable {
    pub header: MetadataHeader,
    pub papers: Vec<Paper>,
}

impl MetadataTable {
    pub fn new(embedder_id: impl Into<String>, fingerprint: impl Into<String>, papers: Vec<Paper>) -> Self {
        Self {
            header: MetadataHeader {
                version: METADATA_VERSION,
                count: papers.len(),
                embedder_id: embedder_id.into(),
                fingerprint: fingerprint.into(),
            },
            papers,
        }
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Paper> {
        self.papers.get(row)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.papers.iter().map(|p| p.id)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        rmp_serde::encode::write_named(&mut writer, self).context("encode metadata")?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("flush {}: {}", path.display(), e.error()))?;
        file.sync_all().context("fsync metadata")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let table: Self = rmp_serde::from_read(BufReader::new(file))
            .with_context(|| format!("decode metadata {}", path.display()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        if self.header.version != METADATA_VERSION {
            bail!("unsupported metadata version {}", self.header.version);
        }
        if self.header.count != self.papers.len() {
            bail!(
                "metadata count mismatch: header says {}, table has {}",
                self.header.count,
                self.papers.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> MetadataTable {
        MetadataTable::new(
            "fnv1a-64",
            "abc",
            vec![
                Paper::new(4, "Graph nets", "Message passing.").with_year(2018),
                Paper::new(9, "Diffusion", "Denoising.").with_pdf_link("https://x/y.pdf"),
            ],
        )
    }

    #[test]
    fn save_load_keeps_row_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("metadata.msgpack");
        let table = sample();
        table.save(&path)?;
        let loaded = MetadataTable::load(&path)?;
        assert_eq!(loaded, table);
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec![4, 9]);
        Ok(())
    }

    #[test]
    fn load_rejects_count_mismatch() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("metadata.msgpack");
        let mut table = sample();
        table.header.count = 5;
        table.save(&path)?;
        let err = MetadataTable::load(&path).unwrap_err();
        assert!(err.to_string().contains("count mismatch"));
        Ok(())
    }

    #[test]
    fn load_rejects_garbage() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("metadata.msgpack");
        std::fs::write(&path, b"\xc1\xc1not msgpack")?;
        assert!(MetadataTable::load(&path).is_err());
        Ok(())
    }
}
