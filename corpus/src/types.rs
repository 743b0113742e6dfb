//! Core data types shared by the corpus components.

use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use teddy_embeddings::EmbeddingMatrix;

use crate::error::{CorpusError, Result};

/// One extracted row: selected column name to a non-null scalar, in
/// selection order.
pub type Record = IndexMap<String, serde_json::Value>;

/// Tabular formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Comma separated text.
    Csv,
    /// Tab separated text.
    Tsv,
    /// Spreadsheet workbook (xlsx, xls, xlsm, ods).
    Workbook,
}

impl SourceFormat {
    /// Resolve the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "xlsx" | "xls" | "xlsm" | "ods" => Ok(Self::Workbook),
            _ => Err(CorpusError::UnsupportedFileType(name.to_string())),
        }
    }
}

/// Raw file content plus its display name.
///
/// Only the bytes take part in cache identity; the name is metadata and
/// the source of the format tag.
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    bytes: Vec<u8>,
    format: SourceFormat,
}

impl SourceFile {
    /// Wrap in-memory content. Fails with `UnsupportedFileType` when the
    /// name's extension is not a known tabular format.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let name = name.into();
        let format = SourceFormat::from_file_name(&name)?;
        Ok(Self {
            name,
            bytes: bytes.into(),
            format,
        })
    }

    /// Read a file from disk.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        // resolve the format before paying for the read
        SourceFormat::from_file_name(&name)?;
        let bytes = tokio::fs::read(path).await?;
        Self::new(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }
}

/// Which columns to read, and from which sheet.
///
/// Column order matters: it fixes both the sentence text and the cache
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub columns: Vec<String>,
    pub sheet: Option<String>,
}

impl ExtractionConfig {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            sheet: None,
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }
}

/// The `metadata.json` artifact of a cached corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusMetadata {
    /// Corpus fingerprint; also the cache directory name.
    pub identity: String,

    /// Digest of the raw source bytes.
    pub file_hash: String,

    /// Display name of the source file.
    pub file_name: String,

    /// Model key the embeddings were produced with.
    pub model_key: String,

    /// Selected columns, in selection order.
    pub columns: Vec<String>,

    /// Sheet the rows came from, if the format has sheets.
    pub sheet_name: Option<String>,

    /// Number of records, sentences and embedding rows.
    pub record_count: usize,

    /// Embedding dimension (0 for an empty corpus).
    pub dimension: usize,

    /// When the corpus was written.
    pub created_at: DateTime<Utc>,
}

/// A fully loaded corpus. `records[i]`, `sentences[i]` and embedding row
/// `i` always describe the same source row.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCorpus {
    pub metadata: CorpusMetadata,
    pub sentences: Vec<String>,
    pub records: Vec<Record>,
    pub embeddings: EmbeddingMatrix,
}

/// A record returned by a query, with its cosine score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMatch {
    /// Row index within the corpus.
    pub index: usize,

    pub record: Record,

    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Sheets and columns of a source file, for column pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOverview {
    /// `None` for formats without sheets.
    pub sheets: Option<Vec<String>>,

    /// Header of the first sheet (or of the file).
    pub columns: Vec<String>,
}
