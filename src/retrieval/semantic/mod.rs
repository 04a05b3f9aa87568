#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::database::lancedb::VectorStore;
use crate::database::sqlite::{ChunkQueries, Database};
use crate::embeddings::EmbeddingProvider;
use crate::retrieval::{
    Candidate, RetrievalMethod, RetrievalQuery, Retriever, matches_filters, sort_candidates,
};
use crate::{EngineError, Result};

/// Cosine hits below this (after rescaling to `[0, 1]`) are dropped
/// unless the query overrides the floor.
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// Embeds the query and searches the vector store; cosine similarity is
/// rescaled from `[-1, 1]` to `[0, 1]`.
pub struct SemanticRetriever {
    database: Database,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SemanticRetriever {
    #[inline]
    pub fn new(
        database: Database,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
        }
    }
}

#[async_trait]
impl Retriever for SemanticRetriever {
    #[inline]
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Semantic
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Candidate>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.text.clone();

        // The provider is a blocking HTTP client; keep it off the
        // async workers.
        let query_vec = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| EngineError::EmbeddingProviderFailed(format!("embed task failed: {e}")))??;

        let hits = self.vector_store.search(&query_vec, query.limit).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let chunks = ChunkQueries::get_many(self.database.pool(), &ids).await?;
        let by_id: HashMap<&str, _> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

        let min_score = query.min_score.unwrap_or(DEFAULT_MIN_SCORE);

        let mut candidates = Vec::new();
        for hit in &hits {
            // Affine rescale from cosine [-1, 1] into [0, 1].
            let score = (f64::from(hit.cosine) + 1.0) / 2.0;
            if score < min_score {
                continue;
            }

            let Some(chunk) = by_id.get(hit.chunk_id.as_str()) else {
                // The indexer may have removed the chunk between the two
                // store reads; skip rather than fabricate.
                continue;
            };
            if !matches_filters(chunk, query) {
                continue;
            }

            candidates.push(Candidate::new(
                (*chunk).clone(),
                RetrievalMethod::Semantic,
                score,
                f64::from(hit.cosine),
            ));
        }

        sort_candidates(&mut candidates);
        candidates.truncate(query.limit);

        debug!("Semantic retrieval produced {} candidates", candidates.len());
        Ok(candidates)
    }
}
