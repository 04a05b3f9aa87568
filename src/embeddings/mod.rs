// Embeddings module
// Provider abstraction over embedding backends, plus the Ollama client

pub mod ollama;


pub use ollama::OllamaProvider;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// Identity of an embedding backend. Recorded in the index header; any
/// change forces a vector index rebuild, never silent reuse of stale
/// vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub model: String,
    pub version: String,
    pub dimension: u32,
}

/// An embedding backend. Implementations must be deterministic: embedding
/// identical content twice produces an identical vector.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn identity(&self) -> ProviderIdentity;
}

/// Deterministic, dependency-free provider that projects identifier tokens
/// into hashed buckets. Not a learned embedding; used by tests and as an
/// offline fallback when no Ollama server is configured.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for term in crate::database::sqlite::identifier_terms(text) {
            let digest = Sha256::digest(term.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            // Sign from another digest byte spreads mass across both
            // hemispheres, which keeps unrelated texts near-orthogonal.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        crate::database::lancedb::normalize_vector(vector)
    }
}

impl EmbeddingProvider for HashingProvider {
    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    #[inline]
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            model: "hashing".to_string(),
            version: "1".to_string(),
            dimension: self.dimension as u32,
        }
    }
}
