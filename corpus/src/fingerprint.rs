//! Content hashes and corpus identities.
//!
//! A corpus identity is a SHA-256 digest over a canonical JSON document
//! holding the file hash, the selected columns, the model key and the
//! sheet. The document's field names are always emitted in sorted order
//! while the column list is kept exactly as given, so reordering the same
//! columns produces a different identity. That is intentional: the
//! sentence text, and therefore every embedding, depends on column order.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex digest of a file's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHash(String);

impl FileHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity of a (file, columns, sheet, model) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusFingerprint(String);

impl CorpusFingerprint {
    /// Wrap an identity previously produced by [`compute_fingerprint`],
    /// e.g. one typed on the command line.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorpusFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash raw file content. Name and path never take part.
pub fn hash_file(bytes: &[u8]) -> FileHash {
    FileHash(hex::encode(Sha256::digest(bytes)))
}

/// Field order here is the canonical (alphabetical) order.
#[derive(Serialize)]
struct CanonicalIdentity<'a> {
    columns: &'a [String],
    file_hash: &'a str,
    model_key: &'a str,
    sheet_name: Option<&'a str>,
}

/// Derive the corpus identity from its four inputs.
///
/// Equal inputs give byte-identical fingerprints on every run and
/// platform. Column order is significant; see the module docs.
pub fn compute_fingerprint(
    file_hash: &FileHash,
    columns: &[String],
    model_key: &str,
    sheet: Option<&str>,
) -> CorpusFingerprint {
    let canonical = CanonicalIdentity {
        columns,
        file_hash: file_hash.as_str(),
        model_key,
        sheet_name: sheet,
    };
    // serializing borrowed strings and a slice cannot fail
    let document = serde_json::to_vec(&canonical).unwrap_or_default();
    CorpusFingerprint(hex::encode(Sha256::digest(&document)))
}
