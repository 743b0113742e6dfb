//! # Embeddings
//!
//! Text embedding and exact similarity ranking for teddy corpora.
//!
//! ## Features
//!
//! - **Embedding Providers**: turn sentences into dense vectors through an
//!   OpenAI-compatible `/embeddings` endpoint
//! - **Model Registry**: an explicit, caller-owned registry that builds one
//!   provider handle per model key on first use
//! - **Similarity Ranking**: brute-force cosine ranking of a query vector
//!   against an in-memory [`EmbeddingMatrix`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ModelRegistry ──► EmbeddingProvider ──► EmbeddingMatrix        │
//! │       │                    │                   │                │
//! │       ▼                    ▼                   ▼                │
//! │  ProviderFactory      OpenAIProvider     top_k_matches          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod matrix;
pub mod provider;
pub mod registry;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use matrix::EmbeddingMatrix;
pub use provider::{EmbeddingProvider, OpenAIProvider};
pub use registry::{HttpProviderFactory, ModelRegistry, ModelSpec, ProviderFactory};
pub use similarity::{SimilarityResult, cosine_similarity, top_k_matches};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
