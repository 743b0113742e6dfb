//! Exact cosine ranking of a query vector against a corpus matrix.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EmbeddingError, Result};
use crate::matrix::EmbeddingMatrix;

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors, or either vector has zero norm
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    let score = dot_product / (magnitude_a * magnitude_b);
    if !score.is_finite() {
        return Ok(0.0);
    }

    // rounding can push parallel vectors a hair past ±1
    Ok(score.clamp(-1.0, 1.0))
}

/// One ranked row of a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Row index into the corpus matrix.
    pub index: usize,

    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Rank every row of `corpus` against `query` and keep the best `k`.
///
/// Results are sorted by descending score; exactly tied scores keep
/// ascending row order so repeated runs return identical lists. A `k`
/// larger than the corpus returns every row. An empty corpus ranks to an
/// empty list.
///
/// Fails with [`EmbeddingError::InvalidQueryShape`] before any arithmetic
/// when the query is empty or its length differs from the corpus width.
pub fn top_k_matches(
    query: &[f32],
    corpus: &EmbeddingMatrix,
    k: usize,
) -> Result<Vec<SimilarityResult>> {
    if query.is_empty() {
        return Err(EmbeddingError::InvalidQueryShape(
            "query vector is empty".to_string(),
        ));
    }
    if corpus.is_empty() {
        return Ok(Vec::new());
    }
    if corpus.dims() != query.len() {
        return Err(EmbeddingError::InvalidQueryShape(format!(
            "query has {} dimensions but corpus rows have {}",
            query.len(),
            corpus.dims()
        )));
    }

    let mut scored = corpus
        .iter_rows()
        .enumerate()
        .map(|(index, row)| {
            cosine_similarity(query, row).map(|score| SimilarityResult { index, score })
        })
        .collect::<Result<Vec<_>>>()?;

    // sort_by is stable, so ties stay in ascending index order
    scored.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)));
    scored.truncate(k);

    debug!(
        "Ranked {} corpus rows, returning {}",
        corpus.rows(),
        scored.len()
    );
    Ok(scored)
}
