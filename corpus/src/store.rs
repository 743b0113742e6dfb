//! On-disk corpus cache.
//!
//! Every corpus lives in its own directory named after its identity:
//!
//! ```text
//! <root>/<identity>/
//!     metadata.json     CorpusMetadata
//!     sentences.json    ["...", ...]
//!     records.json      [{"column": value, ...}, ...]
//!     embeddings.bin    EmbeddingMatrix
//! ```
//!
//! Writes are staged in a hidden sibling directory and swapped in with
//! renames, so a reader sees either no directory or a complete one.
//! Nothing under an identity is modified in place once written.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use teddy_embeddings::EmbeddingMatrix;

use crate::error::{CorpusError, Result};
use crate::types::{CachedCorpus, CorpusMetadata, Record};

const METADATA_FILE: &str = "metadata.json";
const SENTENCES_FILE: &str = "sentences.json";
const RECORDS_FILE: &str = "records.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";

const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// Durable storage of cached corpora, keyed by identity.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Root directory holding one subdirectory per identity.
    root: PathBuf,
}

impl CacheStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// Staging and retired directories left behind by an interrupted save
    /// or delete are removed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let store = Self { root };
        store.sweep_scratch().await?;
        Ok(store)
    }

    async fn sweep_scratch(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(STAGING_PREFIX) && !name.starts_with(RETIRED_PREFIX) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                debug!("Removing stale scratch directory {name}");
                remove_quietly(&entry.path()).await;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn scratch_dir(&self, prefix: &str, id: &str) -> PathBuf {
        self.root.join(format!("{prefix}{id}-{}", Uuid::new_v4().simple()))
    }

    /// Whether a readable metadata artifact exists for `id`.
    pub async fn exists(&self, id: &str) -> bool {
        validate_identity(id).is_ok() && self.load_metadata(id).await.is_ok()
    }

    /// Read only the metadata artifact for `id`.
    pub async fn load_metadata(&self, id: &str) -> Result<CorpusMetadata> {
        validate_identity(id)?;
        let path = self.entry_dir(id).join(METADATA_FILE);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CorpusError::CacheMiss(id.to_string()));
            }
            Err(e) => return Err(CorpusError::malformed(id, format!("{METADATA_FILE}: {e}"))),
        };

        let metadata: CorpusMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| CorpusError::malformed(id, format!("{METADATA_FILE}: {e}")))?;

        if metadata.identity != id {
            return Err(CorpusError::malformed(
                id,
                format!("metadata names identity {}", metadata.identity),
            ));
        }

        Ok(metadata)
    }

    /// Write all four artifacts for `id`, replacing any previous corpus.
    ///
    /// The bundle is checked for index alignment before anything touches
    /// the disk.
    pub async fn save(
        &self,
        id: &str,
        metadata: &CorpusMetadata,
        sentences: &[String],
        records: &[Record],
        embeddings: &EmbeddingMatrix,
    ) -> Result<()> {
        validate_identity(id)?;
        if metadata.identity != id {
            return Err(CorpusError::malformed(
                id,
                format!("metadata names identity {}", metadata.identity),
            ));
        }
        check_alignment(
            id,
            metadata,
            sentences.len(),
            records.len(),
            embeddings,
        )?;

        let staging = self.scratch_dir(STAGING_PREFIX, id);
        if let Err(e) = write_artifacts(&staging, metadata, sentences, records, embeddings).await {
            remove_quietly(&staging).await;
            return Err(e);
        }

        let target = self.entry_dir(id);
        let retired = self.scratch_dir(RETIRED_PREFIX, id);
        let replaced = match fs::rename(&target, &retired).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e.into());
            }
        };

        if let Err(e) = fs::rename(&staging, &target).await {
            if replaced && fs::rename(&retired, &target).await.is_err() {
                warn!("Could not restore previous corpus {id} from {}", retired.display());
            }
            remove_quietly(&staging).await;
            return Err(e.into());
        }

        if replaced {
            remove_quietly(&retired).await;
        }

        info!(
            "Saved corpus {id}: {} records, dimension {}",
            records.len(),
            embeddings.dims()
        );
        Ok(())
    }

    /// Load and cross-validate the corpus for `id`.
    ///
    /// Fails with `CacheMiss` when there is no metadata and with
    /// `MalformedCache` when any artifact is unreadable or the row counts
    /// disagree.
    pub async fn load(&self, id: &str) -> Result<CachedCorpus> {
        let metadata = self.load_metadata(id).await?;
        let dir = self.entry_dir(id);

        let sentences: Vec<String> = read_json(id, &dir, SENTENCES_FILE).await?;
        let records: Vec<Record> = read_json(id, &dir, RECORDS_FILE).await?;

        let matrix_bytes = read_artifact(id, &dir, EMBEDDINGS_FILE).await?;
        let embeddings = EmbeddingMatrix::from_bytes(&matrix_bytes)
            .map_err(|e| CorpusError::malformed(id, format!("{EMBEDDINGS_FILE}: {e}")))?;

        check_alignment(id, &metadata, sentences.len(), records.len(), &embeddings)?;

        debug!("Loaded corpus {id} with {} records", records.len());
        Ok(CachedCorpus {
            metadata,
            sentences,
            records,
            embeddings,
        })
    }

    /// Remove every artifact for `id`. Deleting an unknown identity is a
    /// no-op, including one that could never have been cached.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if validate_identity(id).is_err() {
            debug!("Delete of invalid identity {id:?} ignored");
            return Ok(());
        }
        let target = self.entry_dir(id);
        let retired = self.scratch_dir(RETIRED_PREFIX, id);

        match fs::rename(&target, &retired).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Delete of uncached corpus {id} ignored");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        fs::remove_dir_all(&retired).await?;
        info!("Deleted cached corpus {id}");
        Ok(())
    }

    /// Metadata of every cached corpus, oldest first.
    ///
    /// Entries whose metadata is missing or corrupt are skipped.
    pub async fn list_all(&self) -> Result<Vec<CorpusMetadata>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_identity(&name).is_err() {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            match self.load_metadata(&name).await {
                Ok(metadata) => found.push(metadata),
                Err(e) => warn!("Skipping cache entry {name}: {e}"),
            }
        }

        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(found)
    }
}

/// Identities become directory names, so only plain tokens are allowed.
pub(crate) fn validate_identity(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CorpusError::InvalidIdentity(id.to_string()))
    }
}

fn check_alignment(
    id: &str,
    metadata: &CorpusMetadata,
    sentences: usize,
    records: usize,
    embeddings: &EmbeddingMatrix,
) -> Result<()> {
    let expected = metadata.record_count;
    if sentences != expected || records != expected || embeddings.rows() != expected {
        return Err(CorpusError::malformed(
            id,
            format!(
                "row counts disagree: metadata {expected}, sentences {sentences}, \
                 records {records}, embeddings {}",
                embeddings.rows()
            ),
        ));
    }
    if embeddings.dims() != metadata.dimension {
        return Err(CorpusError::malformed(
            id,
            format!(
                "embedding dimension {} does not match metadata {}",
                embeddings.dims(),
                metadata.dimension
            ),
        ));
    }
    Ok(())
}

async fn write_artifacts(
    dir: &Path,
    metadata: &CorpusMetadata,
    sentences: &[String],
    records: &[Record],
    embeddings: &EmbeddingMatrix,
) -> Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(dir.join(SENTENCES_FILE), serde_json::to_vec_pretty(sentences)?).await?;
    fs::write(dir.join(RECORDS_FILE), serde_json::to_vec_pretty(records)?).await?;
    fs::write(dir.join(EMBEDDINGS_FILE), embeddings.to_bytes()).await?;
    // metadata last: its presence is what marks an entry as cached
    fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(metadata)?).await?;
    debug!("Staged corpus artifacts in {}", dir.display());
    Ok(())
}

async fn read_artifact(id: &str, dir: &Path, file: &str) -> Result<Vec<u8>> {
    fs::read(dir.join(file))
        .await
        .map_err(|e| CorpusError::malformed(id, format!("{file}: {e}")))
}

async fn read_json<T: serde::de::DeserializeOwned>(id: &str, dir: &Path, file: &str) -> Result<T> {
    let bytes = read_artifact(id, dir, file).await?;
    serde_json::from_slice(&bytes).map_err(|e| CorpusError::malformed(id, format!("{file}: {e}")))
}

async fn remove_quietly(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(text: &str) -> Record {
        let mut record = Record::new();
        record.insert("text".to_string(), json!(text));
        record
    }

    fn sample(id: &str) -> (CorpusMetadata, Vec<String>, Vec<Record>, EmbeddingMatrix) {
        let metadata = CorpusMetadata {
            identity: id.to_string(),
            file_hash: "filehash".to_string(),
            file_name: "people.csv".to_string(),
            model_key: "m1".to_string(),
            columns: vec!["text".to_string()],
            sheet_name: None,
            record_count: 2,
            dimension: 3,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let sentences = vec!["hello".to_string(), "world".to_string()];
        let records = vec![record("hello"), record("world")];
        let embeddings =
            EmbeddingMatrix::from_rows(vec![vec![0.1, 0.2, 0.3], vec![-1.5, 0.0, 7.25]]).unwrap();
        (metadata, sentences, records, embeddings)
    }

    async fn store() -> (TempDir, CacheStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().join("cache")).await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, embeddings) = sample("abc123");

        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();
        let loaded = store.load("abc123").await.unwrap();

        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.sentences, sentences);
        assert_eq!(loaded.records, records);
        assert_eq!(loaded.embeddings.to_bytes(), embeddings.to_bytes());
    }

    #[tokio::test]
    async fn test_exists_tracks_metadata() {
        let (_temp, store) = store().await;
        assert!(!store.exists("abc123").await);

        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();
        assert!(store.exists("abc123").await);

        fs::write(store.root().join("abc123").join(METADATA_FILE), b"{not json")
            .await
            .unwrap();
        assert!(!store.exists("abc123").await);
    }

    #[tokio::test]
    async fn test_load_missing_is_cache_miss() {
        let (_temp, store) = store().await;
        let err = store.load("abc123").await.unwrap_err();
        assert!(matches!(err, CorpusError::CacheMiss(id) if id == "abc123"));
    }

    #[tokio::test]
    async fn test_unparsable_artifact_is_malformed() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();

        fs::write(store.root().join("abc123").join(SENTENCES_FILE), b"[1, 2")
            .await
            .unwrap();

        let err = store.load("abc123").await.unwrap_err();
        assert!(matches!(err, CorpusError::MalformedCache { .. }));
    }

    #[tokio::test]
    async fn test_row_count_disagreement_is_malformed() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();

        let one_record = serde_json::to_vec(&vec![record("hello")]).unwrap();
        fs::write(store.root().join("abc123").join(RECORDS_FILE), one_record)
            .await
            .unwrap();

        let err = store.load("abc123").await.unwrap_err();
        assert!(
            matches!(
                &err,
                CorpusError::MalformedCache { reason, .. } if reason.contains("row counts")
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_missing_embeddings_is_malformed() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();

        fs::remove_file(store.root().join("abc123").join(EMBEDDINGS_FILE))
            .await
            .unwrap();

        assert!(matches!(
            store.load("abc123").await,
            Err(CorpusError::MalformedCache { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_misaligned_bundle() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, _) = sample("abc123");
        let one_row = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0, 0.0]]).unwrap();

        let err = store
            .save("abc123", &metadata, &sentences, &records, &one_row)
            .await
            .unwrap_err();

        assert!(matches!(err, CorpusError::MalformedCache { .. }));
        assert!(!store.exists("abc123").await);
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_scratch() {
        let (_temp, store) = store().await;
        let (mut metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();

        metadata.file_name = "renamed.csv".to_string();
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();

        let loaded = store.load_metadata("abc123").await.unwrap();
        assert_eq!(loaded.file_name, "renamed.csv");

        let mut names = Vec::new();
        let mut entries = fs::read_dir(store.root()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_temp, store) = store().await;
        store.delete("neverseen").await.unwrap();

        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();
        store.delete("abc123").await.unwrap();
        store.delete("abc123").await.unwrap();

        assert!(!store.exists("abc123").await);
        assert!(matches!(
            store.load("abc123").await,
            Err(CorpusError::CacheMiss(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_invalid_identity_is_noop() {
        let (temp, store) = store().await;
        fs::create_dir_all(temp.path().join("x")).await.unwrap();

        store.delete("../x").await.unwrap();
        store.delete("").await.unwrap();

        assert!(temp.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_new_sweeps_leftover_scratch_dirs() {
        let (_temp, store) = store().await;
        let (metadata, sentences, records, embeddings) = sample("abc123");
        store
            .save("abc123", &metadata, &sentences, &records, &embeddings)
            .await
            .unwrap();
        for leftover in [".staging-abc123-1", ".retired-abc123-2"] {
            fs::create_dir_all(store.root().join(leftover).join("nested"))
                .await
                .unwrap();
        }
        fs::write(store.root().join(".keep"), b"").await.unwrap();

        let reopened = CacheStore::new(store.root()).await.unwrap();

        let mut names = Vec::new();
        let mut entries = fs::read_dir(reopened.root()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec![".keep".to_string(), "abc123".to_string()]);
        assert_eq!(reopened.load("abc123").await.unwrap().metadata, metadata);
    }

    #[tokio::test]
    async fn test_list_all_skips_corrupt_entries() {
        let (_temp, store) = store().await;
        for id in ["aaa", "bbb"] {
            let (metadata, sentences, records, embeddings) = sample(id);
            store
                .save(id, &metadata, &sentences, &records, &embeddings)
                .await
                .unwrap();
        }
        fs::write(store.root().join("bbb").join(METADATA_FILE), b"garbage")
            .await
            .unwrap();
        fs::create_dir_all(store.root().join("empty")).await.unwrap();
        fs::create_dir_all(store.root().join(".staging-ccc-1")).await.unwrap();

        let listed = store.list_all().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.identity.as_str()).collect();
        assert_eq!(ids, vec!["aaa"]);
    }

    #[tokio::test]
    async fn test_invalid_identity_rejected() {
        let (_temp, store) = store().await;
        for bad in ["", "../escape", ".hidden", "a/b"] {
            assert!(matches!(
                store.load(bad).await,
                Err(CorpusError::InvalidIdentity(_))
            ));
            assert!(!store.exists(bad).await);
        }
    }
}
