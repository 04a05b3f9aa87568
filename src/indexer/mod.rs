// Indexer module
// Keeps the stores in sync with the workspace: full traversal on first
// run, per-file incremental updates afterwards, with chunk-hash diffing
// so unchanged content causes zero store writes.

pub mod chunking;
pub mod consistency;
pub mod deps;
pub mod header;
pub mod queue;
pub mod scanner;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::lancedb::{EmbeddingRecord, VectorStore};
use crate::database::sqlite::{ChunkQueries, ChunkRecord, Database, DepEdge};
use crate::embeddings::EmbeddingProvider;
use crate::indexer::chunking::{ChunkingConfig, chunk_file};
use crate::indexer::deps::extract_dep_edges;
use crate::indexer::header::IndexHeader;
use crate::indexer::scanner::{ScannedFile, WorkspaceScanner};
use crate::tokenizer::ModelFamily;

/// Per-file indexing outcome; all-zero means the file was already current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileIndexOutcome {
    pub inserted: usize,
    pub deleted: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
}

impl FileIndexOutcome {
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.deleted == 0
    }
}

/// Aggregate outcome of a full reindex or startup replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub chunks_inserted: usize,
    pub chunks_deleted: usize,
    pub embedding_failures: usize,
}

impl IndexReport {
    fn absorb(&mut self, outcome: FileIndexOutcome) {
        self.chunks_inserted += outcome.inserted;
        self.chunks_deleted += outcome.deleted;
        self.embedding_failures += outcome.embedding_failures;
    }
}

/// Maintains the invariant that for every included workspace file, the
/// stores reflect its current chunk set.
pub struct Indexer {
    database: Database,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    scanner: WorkspaceScanner,
    chunking: ChunkingConfig,
    workers: usize,
}

impl Indexer {
    #[inline]
    pub fn new(
        database: Database,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        scanner: WorkspaceScanner,
        chunking: ChunkingConfig,
        workers: usize,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
            scanner,
            chunking,
            workers: workers.max(1),
        }
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.vector_store
    }

    #[inline]
    pub fn scanner(&self) -> &WorkspaceScanner {
        &self.scanner
    }

    /// Bring the index up to date at startup.
    ///
    /// If the stored header disagrees with the current schema, tokenizer
    /// family, embedding identity, or workspace root, the index is dropped
    /// and rebuilt. Otherwise filesystem state is verified against index
    /// timestamps and missed changes are replayed.
    pub async fn verify_startup(
        &self,
        header_path: &Path,
        tokenizer_family: ModelFamily,
    ) -> Result<IndexReport> {
        let current = IndexHeader::current(
            tokenizer_family,
            self.embedder.identity(),
            self.scanner.root(),
        );

        let existing = match IndexHeader::load(header_path) {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Unreadable index header, rebuilding: {e:#}");
                None
            }
        };

        let report = match existing {
            Some(existing) if existing.is_compatible_with(&current) => {
                debug!("Index header matches, replaying missed changes");
                self.replay_missed_changes().await?
            }
            Some(_) => {
                info!("Index header mismatch, dropping index for full rebuild");
                self.drop_index().await?;
                self.full_reindex().await?
            }
            None => {
                info!("No index header found, running initial index");
                self.full_reindex().await?
            }
        };

        current.save(header_path)?;
        Ok(report)
    }

    /// Traverse the whole workspace and index every included file, with a
    /// bounded number of files in flight.
    pub async fn full_reindex(&self) -> Result<IndexReport> {
        let files = self.scanner.scan();
        info!("Indexing {} workspace files", files.len());

        let mut report = IndexReport::default();

        let outcomes: Vec<(String, Result<FileIndexOutcome>)> = stream::iter(files)
            .map(|file| async move {
                let relative = file.relative.clone();
                let outcome = self.index_scanned(&file).await;
                (relative, outcome)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for (relative, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    report.files_indexed += 1;
                    report.absorb(outcome);
                }
                Err(e) => {
                    warn!("Failed to index {}: {e:#}", relative);
                    report.files_failed += 1;
                }
            }
        }

        info!(
            "Reindex complete: {} files, {} chunks inserted, {} failures",
            report.files_indexed, report.chunks_inserted, report.files_failed
        );
        Ok(report)
    }

    /// Re-index one file by workspace-relative path. A file that no longer
    /// exists (or no longer passes the inclusion policy) has its chunks
    /// removed instead.
    pub async fn index_file(&self, relative: &str) -> Result<FileIndexOutcome> {
        let absolute = self.scanner.absolute_path(relative);

        match self.scanner.check_file(&absolute) {
            Some(file) => self.index_scanned(&file).await,
            None => {
                let deleted = self.remove_file(relative).await?;
                Ok(FileIndexOutcome {
                    deleted,
                    ..FileIndexOutcome::default()
                })
            }
        }
    }

    /// Remove every chunk of a file from both stores. Vectors go first so
    /// no embedding is ever left without its metadata row.
    pub async fn remove_file(&self, relative: &str) -> Result<usize> {
        let existing = ChunkQueries::get_by_file(self.database.pool(), relative).await?;
        if existing.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = existing.into_iter().map(|c| c.chunk_id).collect();

        self.vector_store
            .delete_many(&ids)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete vectors for {relative}: {e}"))?;

        ChunkQueries::delete_by_file(self.database.pool(), relative).await?;

        debug!("Removed {} chunks for deleted file {}", ids.len(), relative);
        Ok(ids.len())
    }

    async fn index_scanned(&self, file: &ScannedFile) -> Result<FileIndexOutcome> {
        let bytes = std::fs::read(&file.absolute)
            .with_context(|| format!("Failed to read {}", file.absolute.display()))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        let new_chunks = chunk_file(
            &file.relative,
            &file.language,
            &content,
            file.modified_ms,
            &self.chunking,
        );

        let existing = ChunkQueries::get_by_file(self.database.pool(), &file.relative).await?;
        let existing_ids: HashSet<&str> = existing.iter().map(|c| c.chunk_id.as_str()).collect();
        let new_ids: HashSet<&str> = new_chunks.iter().map(|c| c.chunk_id.as_str()).collect();

        let deleted_ids: Vec<String> = existing
            .iter()
            .filter(|c| !new_ids.contains(c.chunk_id.as_str()))
            .map(|c| c.chunk_id.clone())
            .collect();

        let inserted_chunks: Vec<&ChunkRecord> = new_chunks
            .iter()
            .filter(|c| !existing_ids.contains(c.chunk_id.as_str()))
            .collect();

        // Unchanged content produces zero store writes.
        if deleted_ids.is_empty() && inserted_chunks.is_empty() {
            debug!("{} unchanged, skipping", file.relative);
            return Ok(FileIndexOutcome::default());
        }

        let (embeddings, embedding_failures) = self.embed_chunks(&inserted_chunks);

        let inserted: Vec<(ChunkRecord, Vec<DepEdge>)> = inserted_chunks
            .iter()
            .map(|&chunk| (chunk.clone(), extract_dep_edges(chunk)))
            .collect();

        // Delete vectors before metadata, insert metadata before vectors:
        // an embedding row must always have a metadata row.
        self.vector_store
            .delete_many(&deleted_ids)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete stale vectors: {e}"))?;

        ChunkQueries::apply_file_delta(self.database.pool(), &deleted_ids, &inserted).await?;

        let embedded = embeddings.len();
        self.vector_store
            .upsert_batch(embeddings)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store embeddings: {e}"))?;

        debug!(
            "{}: +{} -{} chunks ({} embedded)",
            file.relative,
            inserted.len(),
            deleted_ids.len(),
            embedded
        );

        Ok(FileIndexOutcome {
            inserted: inserted.len(),
            deleted: deleted_ids.len(),
            embedded,
            embedding_failures,
        })
    }

    /// Embed new chunks, batch-first. A failing batch falls back to
    /// per-chunk embedding so one bad chunk is skipped, not the file.
    fn embed_chunks(&self, chunks: &[&ChunkRecord]) -> (Vec<EmbeddingRecord>, usize) {
        if chunks.is_empty() {
            return (Vec::new(), 0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        match self.embedder.embed_batch(&texts) {
            Ok(vectors) => {
                let records = chunks
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddingRecord::new(chunk.chunk_id.clone(), vector))
                    .collect();
                (records, 0)
            }
            Err(batch_error) => {
                warn!("Batch embedding failed, retrying per chunk: {batch_error}");

                let mut records = Vec::new();
                let mut failures = 0;
                for chunk in chunks {
                    match self.embedder.embed(&chunk.content) {
                        Ok(vector) => {
                            records.push(EmbeddingRecord::new(chunk.chunk_id.clone(), vector));
                        }
                        Err(e) => {
                            warn!(
                                "Skipping embedding for chunk {} ({}): {e}",
                                chunk.chunk_id, chunk.file_path
                            );
                            failures += 1;
                        }
                    }
                }
                (records, failures)
            }
        }
    }

    async fn replay_missed_changes(&self) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        let indexed: HashMap<String, i64> = ChunkQueries::list_files(self.database.pool())
            .await?
            .into_iter()
            .collect();

        let on_disk = self.scanner.scan();
        let on_disk_paths: HashSet<&str> = on_disk.iter().map(|f| f.relative.as_str()).collect();

        for file in &on_disk {
            let needs_index = match indexed.get(&file.relative) {
                Some(indexed_ms) => file.modified_ms > *indexed_ms,
                None => true,
            };
            if !needs_index {
                continue;
            }

            match self.index_scanned(file).await {
                Ok(outcome) => {
                    if !outcome.is_noop() {
                        report.files_indexed += 1;
                    }
                    report.absorb(outcome);
                }
                Err(e) => {
                    warn!("Failed to replay {}: {e:#}", file.relative);
                    report.files_failed += 1;
                }
            }
        }

        for relative in indexed.keys() {
            if !on_disk_paths.contains(relative.as_str()) {
                let deleted = self.remove_file(relative).await?;
                report.files_removed += 1;
                report.chunks_deleted += deleted;
            }
        }

        if report != IndexReport::default() {
            info!(
                "Replay complete: {} files refreshed, {} removed",
                report.files_indexed, report.files_removed
            );
        }
        Ok(report)
    }

    async fn drop_index(&self) -> Result<()> {
        ChunkQueries::clear_all(self.database.pool()).await?;
        self.vector_store
            .reset()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reset vector store: {e}"))?;
        Ok(())
    }
}
