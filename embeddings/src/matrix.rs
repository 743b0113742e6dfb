//! Dense row-major embedding matrix and its on-disk encoding.
//!
//! The binary layout is:
//!
//! ```text
//! ┌────────┬─────────┬──────────┬──────────┬──────────────────────────┐
//! │ "TDEM" │ version │ rows u64 │ dims u64 │ rows × dims f32 (LE)     │
//! └────────┴─────────┴──────────┴──────────┴──────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian, so a saved matrix reloads
//! bit-for-bit on every platform.

use std::mem::size_of;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

const MAGIC: &[u8; 4] = b"TDEM";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + size_of::<u32>() + 2 * size_of::<u64>();

/// A `rows × dims` matrix of `f32`, one row per corpus entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dims: usize,
}

impl EmbeddingMatrix {
    /// An empty `0 × 0` matrix.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a matrix from equal-length rows.
    ///
    /// Ragged input is rejected; every row of a corpus must come from the
    /// same model and therefore have the same length.
    pub fn from_rows(rows: Vec<Embedding>) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self::empty());
        };
        let dims = first.len();
        if dims == 0 {
            return Err(EmbeddingError::InvalidQueryShape(
                "embedding rows must not be empty".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(rows.len() * dims);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dims {
                return Err(EmbeddingError::InvalidQueryShape(format!(
                    "row {i} has {} columns, expected {dims}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            data,
            rows: rows.len(),
            dims,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (the embedding dimension).
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Borrow row `index`, if present.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// Iterate over rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        // chunks_exact panics on a zero chunk size
        self.data.chunks_exact(self.dims.max(1)).take(self.rows)
    }

    /// Encode the matrix into its binary artifact form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * size_of::<f32>());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.rows as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decode a matrix previously produced by [`EmbeddingMatrix::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(EmbeddingError::MalformedMatrix(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(EmbeddingError::MalformedMatrix("bad magic".to_string()));
        }

        let version = u32::from_le_bytes(read_array(bytes, 4));
        if version != FORMAT_VERSION {
            return Err(EmbeddingError::MalformedMatrix(format!(
                "unsupported format version {version}"
            )));
        }

        let rows = usize::try_from(u64::from_le_bytes(read_array(bytes, 8)))
            .map_err(|_| EmbeddingError::MalformedMatrix("row count overflow".to_string()))?;
        let dims = usize::try_from(u64::from_le_bytes(read_array(bytes, 16)))
            .map_err(|_| EmbeddingError::MalformedMatrix("dimension overflow".to_string()))?;

        let expected = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(size_of::<f32>()))
            .ok_or_else(|| EmbeddingError::MalformedMatrix("matrix size overflow".to_string()))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(EmbeddingError::MalformedMatrix(format!(
                "expected {expected} payload bytes for {rows}x{dims}, found {}",
                payload.len()
            )));
        }
        if rows > 0 && dims == 0 {
            return Err(EmbeddingError::MalformedMatrix(format!(
                "{rows} rows with zero dimension"
            )));
        }

        let data = payload
            .chunks_exact(size_of::<f32>())
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self { data, rows, dims })
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
