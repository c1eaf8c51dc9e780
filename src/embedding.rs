use std::path::Path;

use rayon::prelude::*;

use crate::error::{Error, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
/// Header blocks (magic + version + length + dict) are padded to this size.
const NPY_ALIGN: usize = 64;

/// A dense row-major `f32` matrix, one embedding per row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    /// `data[row * dim + col]`.
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// An empty matrix with a known embedding dimension.
    pub fn empty(dim: usize) -> Self {
        Self {
            rows: 0,
            dim,
            data: Vec::new(),
        }
    }

    pub fn from_flat(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != element_count(rows, dim)? {
            return Err(Error::InvalidFormat(format!(
                "embedding data has {} values, expected {rows} x {dim}",
                data.len()
            )));
        }
        Ok(Self { rows, dim, data })
    }

    /// Build a matrix from individual vectors, which must share a length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::Encoder(format!(
                    "embedding {i} has dimension {}, expected {dim}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// The embedding stored at `idx`.
    ///
    /// Panics if `idx` is out of bounds.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.data[start..start + self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact(0) panics, and a zero-width matrix has no rows anyway.
        self.data.chunks_exact(self.dim.max(1)).take(self.rows)
    }

    /// Append every row of `other`, keeping row order.
    pub fn append(&mut self, other: EmbeddingMatrix) -> Result<()> {
        if other.rows == 0 {
            return Ok(());
        }
        if self.rows == 0 {
            self.dim = other.dim;
        } else if self.dim != other.dim {
            return Err(Error::Encoder(format!(
                "embedding dimension changed from {} to {} between batches",
                self.dim, other.dim
            )));
        }
        self.rows += other.rows;
        self.data.extend(other.data);
        Ok(())
    }

    /// Cosine similarity of `query` against every row, in row order.
    pub fn similarities(&self, query: &[f32]) -> Vec<f32> {
        if self.rows == 0 {
            return Vec::new();
        }
        self.data
            .par_chunks_exact(self.dim.max(1))
            .take(self.rows)
            .map(|row| cosine_similarity(row, query))
            .collect()
    }

    /// Serialize as a NumPy `.npy` (v1.0, little-endian `f32`, C order).
    pub fn to_npy_bytes(&self) -> Vec<u8> {
        let dict = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
            self.rows, self.dim
        );
        // magic (6) + version (2) + header length (2) + dict + '\n'
        let unpadded = NPY_MAGIC.len() + 4 + dict.len() + 1;
        let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
        let header_len = dict.len() + padding + 1;

        let mut out = Vec::with_capacity(
            unpadded + padding + std::mem::size_of_val(self.data.as_slice()),
        );
        out.extend_from_slice(NPY_MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header_len as u16).to_le_bytes());
        out.extend_from_slice(dict.as_bytes());
        out.extend(std::iter::repeat_n(b' ', padding));
        out.push(b'\n');

        if cfg!(target_endian = "little") {
            out.extend_from_slice(bytemuck::cast_slice(&self.data));
        } else {
            for v in &self.data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Parse a 2-D little-endian `f32` `.npy` payload.
    pub fn from_npy_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 10 || !bytes.starts_with(NPY_MAGIC) {
            return Err(Error::InvalidFormat("not an .npy file".into()));
        }

        let (header_start, header_len) = match bytes[6] {
            1 => (10, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
            2 | 3 if bytes.len() >= 12 => (
                12,
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]])
                    as usize,
            ),
            v => {
                return Err(Error::InvalidFormat(format!(
                    "unsupported .npy version {v}"
                )));
            }
        };

        let data_start = header_start + header_len;
        let header = bytes
            .get(header_start..data_start)
            .and_then(|h| std::str::from_utf8(h).ok())
            .ok_or_else(|| {
                Error::InvalidFormat("truncated .npy header".into())
            })?;

        let (rows, dim) = parse_npy_header(header)?;

        let payload = &bytes[data_start..];
        let expected = element_count(rows, dim)?
            .checked_mul(4)
            .ok_or_else(|| shape_overflow(rows, dim))?;
        if payload.len() != expected {
            return Err(Error::InvalidFormat(format!(
                ".npy payload is {} bytes, expected {expected}",
                payload.len(),
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self { rows, dim, data })
    }

    pub fn write_npy(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_npy_bytes())?;
        Ok(())
    }

    pub fn read_npy(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_npy_bytes(&bytes)
    }
}

fn element_count(rows: usize, dim: usize) -> Result<usize> {
    rows.checked_mul(dim).ok_or_else(|| shape_overflow(rows, dim))
}

fn shape_overflow(rows: usize, dim: usize) -> Error {
    Error::InvalidFormat(format!("matrix shape {rows} x {dim} is too large"))
}

/// Extract `(rows, dim)` from an `.npy` header dictionary, rejecting
/// anything but C-ordered little-endian `f32` matrices.
fn parse_npy_header(header: &str) -> Result<(usize, usize)> {
    let descr = header
        .split_once("'descr':")
        .and_then(|(_, rest)| rest.trim_start().strip_prefix('\''))
        .and_then(|rest| rest.split_once('\''))
        .map(|(descr, _)| descr)
        .ok_or_else(|| Error::InvalidFormat(".npy header lacks descr".into()))?;
    if descr != "<f4" {
        return Err(Error::InvalidFormat(format!(
            "unsupported .npy dtype {descr}, expected <f4"
        )));
    }

    let fortran = header
        .split_once("'fortran_order':")
        .map(|(_, rest)| rest.trim_start().starts_with("True"))
        .unwrap_or(false);
    if fortran {
        return Err(Error::InvalidFormat(
            "fortran-ordered .npy arrays are not supported".into(),
        ));
    }

    let shape = header
        .split_once("'shape':")
        .and_then(|(_, rest)| rest.trim_start().strip_prefix('('))
        .and_then(|rest| rest.split_once(')'))
        .map(|(shape, _)| shape)
        .ok_or_else(|| Error::InvalidFormat(".npy header lacks shape".into()))?;

    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>().map_err(|_| {
                Error::InvalidFormat(format!("bad .npy shape entry '{s}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    match dims.as_slice() {
        [rows, dim] => Ok((*rows, *dim)),
        _ => Err(Error::InvalidFormat(format!(
            "expected a 2-D .npy array, got shape ({shape})"
        ))),
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Index and value of the highest score. The first index wins ties and NaN
/// never wins.
pub fn best_match(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}
