//! Raw embedding matrix persisted as NPY v1.0 (`<f4`, C order, shape `(n, d)`).
//!
//! The matrix is the exact normalized vectors the index was built from, kept so
//! other tools can consume them and so builds can be compared.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_HEADER_ALIGN: usize = 64;

/// Row-major `f32` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn new(dimension: usize) -> Self {
        Self {
            rows: 0,
            dimension,
            data: Vec::new(),
        }
    }

    pub fn from_rows(dimension: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut matrix = Self::new(dimension);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dimension {
            bail!(
                "matrix row dimension mismatch: expected {}, got {}",
                self.dimension,
                row.len()
            );
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero; a zero-width matrix has no rows to yield.
        self.data.chunks_exact(self.dimension.max(1))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn write_npy<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = npy_header(self.rows, self.dimension);
        writer.write_all(&header)?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_npy(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("flush {}: {}", path.display(), e.error()))?;
        file.sync_all().context("fsync embedding matrix")?;
        Ok(())
    }

    pub fn read_npy<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic).context("read NPY magic")?;
        if &magic != NPY_MAGIC {
            bail!("not an NPY file");
        }
        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        let header_len = match version[0] {
            1 => {
                let mut buf = [0u8; 2];
                reader.read_exact(&mut buf)?;
                u16::from_le_bytes(buf) as usize
            }
            2 | 3 => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                u32::from_le_bytes(buf) as usize
            }
            other => bail!("unsupported NPY version {other}"),
        };
        let mut header = vec![0u8; header_len];
        reader.read_exact(&mut header).context("read NPY header")?;
        let header = String::from_utf8(header).context("NPY header is not UTF-8")?;
        let (rows, dimension) = parse_npy_header(&header)?;

        let byte_len = rows
            .checked_mul(dimension)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| anyhow!("NPY shape ({rows}, {dimension}) overflows"))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() != byte_len {
            bail!(
                "NPY payload size mismatch: expected {} bytes, got {}",
                byte_len,
                bytes.len()
            );
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        Self::read_npy(BufReader::new(file))
            .with_context(|| format!("read embedding matrix {}", path.display()))
    }
}

fn npy_header(rows: usize, dimension: usize) -> Vec<u8> {
    let mut dict =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {dimension}), }}");
    // magic(6) + version(2) + len(2) + dict + '\n' must be a multiple of 64.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (NPY_HEADER_ALIGN - unpadded % NPY_HEADER_ALIGN) % NPY_HEADER_ALIGN;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(10 + dict.len());
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

fn parse_npy_header(header: &str) -> Result<(usize, usize)> {
    if !header.contains("'descr': '<f4'") {
        bail!("unsupported NPY dtype (expected '<f4'): {}", header.trim());
    }
    if header.contains("'fortran_order': True") {
        bail!("Fortran-ordered NPY arrays are not supported");
    }
    let shape_start = header
        .find("'shape': (")
        .ok_or_else(|| anyhow!("NPY header has no shape"))?
        + "'shape': (".len();
    let shape_end = header[shape_start..]
        .find(')')
        .ok_or_else(|| anyhow!("NPY shape is not terminated"))?
        + shape_start;
    let dims: Vec<usize> = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().context("parse NPY shape"))
        .collect::<Result<_>>()?;
    match dims.as_slice() {
        [rows, dimension] => Ok((*rows, *dimension)),
        other => bail!("expected a 2-D NPY array, got shape {other:?}"),
    }
}
