// Cross-store consistency validation
// Ensures every embedding has a metadata row, and repairs drift in either
// direction: orphaned vectors are deleted, missing vectors re-embedded.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::database::lancedb::{EmbeddingRecord, VectorStore};
use crate::database::sqlite::{ChunkQueries, Database};
use crate::embeddings::EmbeddingProvider;

/// Consistency check results between the metadata and vector stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of chunks in the metadata store.
    pub metadata_chunks: usize,
    /// Number of embeddings in the vector store.
    pub vector_embeddings: usize,
    /// Chunk ids present in metadata but missing a vector.
    pub missing_in_vector_store: Vec<String>,
    /// Chunk ids present in the vector store with no metadata row.
    pub orphaned_in_vector_store: Vec<String>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Human-readable summary for the status command.
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} chunks, {} embeddings",
                self.metadata_chunks, self.vector_embeddings
            )
        } else {
            format!(
                "Index inconsistencies found: {} chunks missing vectors, {} orphaned vectors",
                self.missing_in_vector_store.len(),
                self.orphaned_in_vector_store.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_vector_store.len() + self.orphaned_in_vector_store.len()
    }
}

/// Performs consistency validation between the two stores.
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    vector_store: &'a VectorStore,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        vector_store: &'a VectorStore,
        embedder: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
        }
    }

    /// Perform a full consistency check between the stores.
    #[inline]
    pub async fn validate(&self) -> Result<ConsistencyReport> {
        info!("Starting cross-store consistency validation");

        let metadata_ids = ChunkQueries::list_all_chunk_ids(self.database.pool()).await?;
        debug!("Found {} chunks in metadata store", metadata_ids.len());

        let vector_ids = self
            .vector_store
            .list_chunk_ids()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list vector ids: {e}"))?;
        debug!("Found {} embeddings in vector store", vector_ids.len());

        let metadata_set: HashSet<&String> = metadata_ids.iter().collect();
        let vector_set: HashSet<&String> = vector_ids.iter().collect();

        let mut missing_in_vector_store: Vec<String> = metadata_set
            .difference(&vector_set)
            .map(|id| (*id).clone())
            .collect();
        missing_in_vector_store.sort();

        let mut orphaned_in_vector_store: Vec<String> = vector_set
            .difference(&metadata_set)
            .map(|id| (*id).clone())
            .collect();
        orphaned_in_vector_store.sort();

        let is_consistent =
            missing_in_vector_store.is_empty() && orphaned_in_vector_store.is_empty();

        let report = ConsistencyReport {
            metadata_chunks: metadata_ids.len(),
            vector_embeddings: vector_ids.len(),
            missing_in_vector_store,
            orphaned_in_vector_store,
            is_consistent,
        };

        if report.is_consistent {
            info!("Consistency validation passed");
        } else {
            warn!("Consistency validation found issues: {}", report.summary());
        }

        Ok(report)
    }

    /// Delete vectors that have no metadata row. Returns how many were
    /// removed.
    #[inline]
    pub async fn cleanup_orphaned(&self, chunk_ids: &[String]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        info!("Cleaning up {} orphaned embeddings", chunk_ids.len());

        self.vector_store
            .delete_many(chunk_ids)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete orphaned embeddings: {e}"))?;

        Ok(chunk_ids.len())
    }

    /// Re-embed chunks whose vectors are missing. Individual failures are
    /// logged and skipped.
    #[inline]
    pub async fn regenerate_missing(&self, chunk_ids: &[String]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        info!("Regenerating {} missing embeddings", chunk_ids.len());

        let chunks =
            ChunkQueries::get_many(self.database.pool(), chunk_ids).await?;

        let mut regenerated = 0;
        for chunk in &chunks {
            match self.embedder.embed(&chunk.content) {
                Ok(vector) => {
                    let record = EmbeddingRecord::new(chunk.chunk_id.clone(), vector);
                    if let Err(e) = self.vector_store.upsert(record).await {
                        error!("Failed to store regenerated embedding {}: {e}", chunk.chunk_id);
                        continue;
                    }
                    regenerated += 1;
                    debug!("Regenerated embedding for chunk {}", chunk.chunk_id);
                }
                Err(e) => {
                    error!("Failed to re-embed chunk {}: {e}", chunk.chunk_id);
                }
            }
        }

        info!("Regenerated {} embeddings", regenerated);
        Ok(regenerated)
    }

    /// Validate and repair in one pass: drop orphans, re-embed missing.
    #[inline]
    pub async fn repair(&self) -> Result<ConsistencyReport> {
        let report = self.validate().await?;
        if report.is_consistent {
            return Ok(report);
        }

        self.cleanup_orphaned(&report.orphaned_in_vector_store)
            .await?;
        self.regenerate_missing(&report.missing_in_vector_store)
            .await?;

        self.validate().await
    }
}
