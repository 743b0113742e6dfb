//! # Corpus
//!
//! Turns rows of CSV, TSV and Excel files into searchable embedding corpora
//! and answers natural-language queries against them.
//!
//! A corpus is identified by a fingerprint over the file contents, the
//! selected columns, the sheet and the model key. Prepared corpora live on
//! disk under a [`CacheStore`] so the same selection is only embedded once.
//!
//! ```text
//! SourceFile ──► DataExtractor ──► sentences ──► EmbeddingProvider
//!                                                      │
//!                                                      ▼
//!                 query ──► top_k_matches ◄──── CacheStore
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod fingerprint;
pub mod store;
pub mod types;

pub use builder::{CorpusBuilder, build_sentence, has_selected_value};
pub use config::{EmbeddingConfig, TeddyConfig, load_config};
pub use error::{CorpusError, Result};
pub use export::{ExportFormat, export_results};
pub use extract::{DataExtractor, TabularExtractor};
pub use fingerprint::{CorpusFingerprint, FileHash, compute_fingerprint, hash_file};
pub use store::CacheStore;
pub use types::{
    CachedCorpus, CorpusMetadata, ExtractionConfig, FileOverview, Record, RecordMatch,
    SourceFile, SourceFormat,
};
