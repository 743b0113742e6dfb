//! Error types for corpus preparation, caching and querying.

use thiserror::Error;

use teddy_embeddings::EmbeddingError;

/// Result type alias for corpus operations.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Errors that can occur while building, caching or querying a corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The source file format is not recognized.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// No cached corpus exists for the identity.
    #[error("no cached corpus for {0}")]
    CacheMiss(String),

    /// A cached artifact is unreadable, unparsable or inconsistent.
    #[error("malformed cache entry {id}: {reason}")]
    MalformedCache { id: String, reason: String },

    /// The identity cannot be used as a cache directory name.
    #[error("invalid corpus identity: {0:?}")]
    InvalidIdentity(String),

    /// A selected column does not exist in the source.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// The requested sheet does not exist in the workbook.
    #[error("unknown sheet: {0}")]
    UnknownSheet(String),

    /// The source could not be parsed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The export target extension is not supported.
    #[error("unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    /// Embedding provider, model registry or ranking error.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delimited text read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorpusError {
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCache {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
