//! Cache-aside corpus preparation and querying.
//!
//! `prepare_corpus` derives the corpus identity, reuses a matching cached
//! corpus when there is one, and otherwise extracts, embeds and saves.
//! `query_corpus` embeds the query text and ranks the cached vectors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use teddy_embeddings::{EmbeddingError, EmbeddingMatrix, ModelRegistry, top_k_matches};

use crate::error::{CorpusError, Result};
use crate::extract::{DataExtractor, TabularExtractor};
use crate::fingerprint::{CorpusFingerprint, compute_fingerprint, hash_file};
use crate::store::CacheStore;
use crate::types::{
    CorpusMetadata, ExtractionConfig, FileOverview, Record, RecordMatch, SourceFile,
};

/// Joins column values into a sentence.
pub const SENTENCE_SEPARATOR: &str = " ";

/// Default bound on a single embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(120);

/// Orchestrates extraction, embedding and caching of corpora.
pub struct CorpusBuilder {
    /// Where corpora are cached.
    store: CacheStore,

    /// Supported models and their provider handles.
    registry: Arc<ModelRegistry>,

    /// Source row reader.
    extractor: Arc<dyn DataExtractor>,

    /// Upper bound on each provider call.
    embed_timeout: Duration,
}

impl CorpusBuilder {
    /// Create a builder using the built-in tabular extractor.
    pub fn new(store: CacheStore, registry: Arc<ModelRegistry>) -> Self {
        Self {
            store,
            registry,
            extractor: Arc::new(TabularExtractor),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    /// Replace the row extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn DataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Bound every embedding call by `timeout`.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Return the identity of a cached corpus for this file, selection and
    /// model, building and caching it first if needed.
    ///
    /// An unknown model key fails before any extraction work. The provider
    /// handle is only built when something has to be embedded. Extractor and
    /// provider errors are returned as they are, without retries.
    pub async fn prepare_corpus(
        &self,
        file: &SourceFile,
        config: &ExtractionConfig,
        model_key: &str,
    ) -> Result<CorpusFingerprint> {
        if !self.registry.contains(model_key) {
            return Err(EmbeddingError::UnsupportedModel(model_key.to_string()).into());
        }

        let file_hash = hash_file(file.bytes());
        let fingerprint =
            compute_fingerprint(&file_hash, &config.columns, model_key, config.sheet.as_deref());
        let id = fingerprint.as_str();

        match self.store.load_metadata(id).await {
            Ok(existing)
                if existing.columns == config.columns
                    && existing.model_key == model_key
                    && existing.sheet_name == config.sheet =>
            {
                info!("Cache hit for {} ({id})", file.name());
                return Ok(fingerprint);
            }
            Ok(_) => info!("Cached corpus {id} does not match the request, rebuilding"),
            Err(CorpusError::CacheMiss(_)) => info!("Cache miss for {} ({id})", file.name()),
            Err(e) => warn!("Rebuilding unreadable cache entry {id}: {e}"),
        }

        let records: Vec<Record> = self
            .extractor
            .extract(file, config.sheet.as_deref(), &config.columns)?
            .into_iter()
            .filter(|record| has_selected_value(record, &config.columns))
            .collect();
        let sentences: Vec<String> = records
            .iter()
            .map(|record| build_sentence(record, &config.columns))
            .collect();

        let embeddings = if sentences.is_empty() {
            EmbeddingMatrix::empty()
        } else {
            let provider = self.registry.provider(model_key).await?;
            info!(
                "Embedding {} sentences with {model_key}",
                sentences.len()
            );
            let rows = self.bounded(provider.embed_batch(&sentences)).await?;
            if rows.len() != sentences.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "provider returned {} embeddings for {} sentences",
                    rows.len(),
                    sentences.len()
                ))
                .into());
            }
            EmbeddingMatrix::from_rows(rows)?
        };

        let metadata = CorpusMetadata {
            identity: id.to_string(),
            file_hash: file_hash.to_string(),
            file_name: file.name().to_string(),
            model_key: model_key.to_string(),
            columns: config.columns.clone(),
            sheet_name: config.sheet.clone(),
            record_count: records.len(),
            dimension: embeddings.dims(),
            created_at: Utc::now(),
        };
        self.store
            .save(id, &metadata, &sentences, &records, &embeddings)
            .await?;

        Ok(fingerprint)
    }

    /// Rank the rows of a cached corpus against `query_text` and return the
    /// best `top_k`, highest score first.
    ///
    /// The corpus must have been embedded with `model_key`; vectors from
    /// different models are never compared.
    pub async fn query_corpus(
        &self,
        query_text: &str,
        fingerprint: &CorpusFingerprint,
        model_key: &str,
        top_k: usize,
    ) -> Result<Vec<RecordMatch>> {
        let provider = self.registry.provider(model_key).await?;
        let corpus = self.store.load(fingerprint.as_str()).await?;

        if corpus.metadata.model_key != model_key {
            return Err(CorpusError::Config(format!(
                "corpus {fingerprint} was embedded with {}, not {model_key}",
                corpus.metadata.model_key
            )));
        }

        let query = self.bounded(provider.embed_query(query_text)).await?;
        let ranked = top_k_matches(&query, &corpus.embeddings, top_k)?;
        debug!("Query matched {} of {} rows", ranked.len(), corpus.records.len());

        let mut records = corpus.records;
        Ok(ranked
            .into_iter()
            .map(|hit| RecordMatch {
                index: hit.index,
                record: std::mem::take(&mut records[hit.index]),
                score: hit.score,
            })
            .collect())
    }

    /// Sheets and columns of a file, for picking an extraction config.
    pub fn inspect(&self, file: &SourceFile) -> Result<FileOverview> {
        let sheets = self.extractor.list_sheets(file)?;
        let first_sheet = sheets.as_ref().and_then(|s| s.first()).map(String::as_str);
        let columns = self.extractor.list_columns(file, first_sheet)?;
        Ok(FileOverview { sheets, columns })
    }

    /// Metadata of every cached corpus.
    pub async fn list_cached(&self) -> Result<Vec<CorpusMetadata>> {
        self.store.list_all().await
    }

    /// Drop a cached corpus; unknown identities are ignored.
    pub async fn delete(&self, fingerprint: &CorpusFingerprint) -> Result<()> {
        self.store.delete(fingerprint.as_str()).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = teddy_embeddings::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.embed_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EmbeddingError::Timeout {
                secs: self.embed_timeout.as_secs(),
            }
            .into()),
        }
    }
}

/// Whether any selected column holds a non-null value.
pub fn has_selected_value(record: &Record, columns: &[String]) -> bool {
    columns
        .iter()
        .any(|column| record.get(column).is_some_and(|v| !v.is_null()))
}

/// Join the record's selected values in column order, skipping absent and
/// null columns.
pub fn build_sentence(record: &Record, columns: &[String]) -> String {
    columns
        .iter()
        .filter_map(|column| record.get(column))
        .filter(|value| !value.is_null())
        .map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(SENTENCE_SEPARATOR)
}
