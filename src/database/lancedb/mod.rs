// LanceDB vector database module
// Handles embedding persistence and approximate cosine similarity search

pub mod vector_store;

pub use vector_store::*;

use serde::{Deserialize, Serialize};

/// Embedding record stored in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Chunk this vector belongs to; joins against the metadata store.
    pub chunk_id: String,
    /// The embedding, cosine-normalized at insert time.
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    #[inline]
    pub fn new(chunk_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            vector: normalize_vector(vector),
        }
    }
}

/// Scale a vector to unit norm so cosine similarity reduces to a dot
/// product. Zero vectors are returned unchanged.
pub fn normalize_vector(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` for empty or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
