#[cfg(test)]
mod tests;

use super::EmbeddingRecord;
use crate::EngineError;
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const TABLE_NAME: &str = "embeddings";

/// Quarantined copies of a corrupt store kept on disk before the oldest
/// is pruned.
const MAX_QUARANTINE_SLOTS: usize = 2;

/// Vector store backed by LanceDB.
///
/// Holds fixed-dimensional, unit-norm embeddings keyed by chunk id and
/// answers approximate cosine similarity queries. Results are stable for
/// identical inputs between index mutations.
pub struct VectorStore {
    connection: Connection,
    dimension: usize,
}

/// A similarity hit: chunk id plus cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub cosine: f32,
}

impl VectorStore {
    /// Open (or create) the store at `db_path` for `dimension`-wide
    /// vectors, recovering from a corrupted directory if needed.
    #[inline]
    pub async fn new(db_path: &Path, dimension: usize) -> Result<Self, EngineError> {
        debug!("Initializing vector store at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::IndexUnavailable(format!(
                    "Failed to create vector store directory: {e}"
                ))
            })?;
        }

        let uri = format!("file://{}", db_path.display());

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to vector store: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Vector store corruption detected, attempting recovery");
                    Self::quarantine_corrupt_store(db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        EngineError::IndexUnavailable(format!(
                            "Failed to connect to vector store after recovery: {e}"
                        ))
                    })?
                } else {
                    return Err(EngineError::IndexUnavailable(format!(
                        "Failed to connect to vector store: {e}"
                    )));
                }
            }
        };

        let store = Self {
            connection,
            dimension,
        };

        store.initialize_table().await?;

        info!("Vector store initialized ({}d)", dimension);
        Ok(store)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn initialize_table(&self) -> Result<(), EngineError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to list tables: {e}")))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            return Ok(());
        }

        debug!("Creating embeddings table ({}d)", self.dimension);

        self.connection
            .create_empty_table(TABLE_NAME, self.schema())
            .execute()
            .await
            .map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to create embeddings table: {e}"))
            })?;

        Ok(())
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    /// Insert or replace one embedding.
    #[inline]
    pub async fn upsert(&self, record: EmbeddingRecord) -> Result<(), EngineError> {
        self.upsert_batch(vec![record]).await
    }

    /// Insert or replace a batch of embeddings. Existing rows with the
    /// same chunk ids are deleted first so each chunk has exactly one
    /// vector.
    #[inline]
    pub async fn upsert_batch(&self, records: Vec<EmbeddingRecord>) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }

        for record in &records {
            if record.vector.len() != self.dimension {
                return Err(EngineError::IndexUnavailable(format!(
                    "Vector for chunk {} has dimension {} (store expects {})",
                    record.chunk_id,
                    record.vector.len(),
                    self.dimension
                )));
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.chunk_id.clone()).collect();
        self.delete_many(&ids).await?;

        let batch = self.create_record_batch(&records)?;
        let table = self.open_table().await?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to insert embeddings: {e}"))
            })?;

        debug!("Stored {} embeddings", records.len());
        Ok(())
    }

    /// Delete the embedding for one chunk.
    #[inline]
    pub async fn delete(&self, chunk_id: &str) -> Result<(), EngineError> {
        let ids = [chunk_id.to_string()];
        self.delete_many(&ids).await
    }

    /// Delete embeddings for a set of chunk ids.
    #[inline]
    pub async fn delete_many(&self, chunk_ids: &[String]) -> Result<(), EngineError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let table = self.open_table().await?;
        let quoted: Vec<String> = chunk_ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        let predicate = format!("chunk_id IN ({})", quoted.join(", "));

        table.delete(&predicate).await.map_err(|e| {
            EngineError::IndexUnavailable(format!("Failed to delete embeddings: {e}"))
        })?;

        Ok(())
    }

    /// Approximate nearest neighbors by cosine similarity, best first.
    #[inline]
    pub async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<VectorHit>, EngineError> {
        if query_vec.len() != self.dimension {
            return Err(EngineError::IndexUnavailable(format!(
                "Query vector has dimension {} (store expects {})",
                query_vec.len(),
                self.dimension
            )));
        }

        let table = self.open_table().await?;

        let results = table
            .vector_search(query_vec)
            .map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to build vector search: {e}"))
            })?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to execute vector search: {e}"))
            })?;

        self.parse_search_stream(results).await
    }

    async fn parse_search_stream(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<VectorHit>, EngineError> {
        let mut hits = Vec::new();

        while let Some(batch) = results.try_next().await.map_err(|e| {
            EngineError::IndexUnavailable(format!("Failed to read search results: {e}"))
        })? {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Vector search returned {} hits", hits.len());
        Ok(hits)
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<VectorHit>, EngineError> {
        let chunk_ids = batch
            .column_by_name("chunk_id")
            .ok_or_else(|| EngineError::IndexUnavailable("Missing chunk_id column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| {
                EngineError::IndexUnavailable("Invalid chunk_id column type".to_string())
            })?;

        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut hits = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Cosine distance is 1 - cosine similarity.
            hits.push(VectorHit {
                chunk_id: chunk_ids.value(row).to_string(),
                cosine: 1.0 - distance,
            });
        }

        Ok(hits)
    }

    fn create_record_batch(
        &self,
        records: &[EmbeddingRecord],
    ) -> Result<RecordBatch, EngineError> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);
        for record in records {
            ids.push(record.chunk_id.as_str());
            flat_values.extend_from_slice(&record.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| EngineError::IndexUnavailable(format!("Failed to build vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> =
            vec![Arc::new(StringArray::from(ids)), Arc::new(vector_array)];

        RecordBatch::try_new(self.schema(), arrays).map_err(|e| {
            EngineError::IndexUnavailable(format!("Failed to build record batch: {e}"))
        })
    }

    /// Total number of stored embeddings.
    #[inline]
    pub async fn count(&self) -> Result<u64, EngineError> {
        let table = self.open_table().await?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to count rows: {e}")))?;

        Ok(count as u64)
    }

    /// All chunk ids present in the store, sorted. Used by the
    /// consistency validator to diff against the metadata store.
    #[inline]
    pub async fn list_chunk_ids(&self) -> Result<Vec<String>, EngineError> {
        let table = self.open_table().await?;

        let total = table
            .count_rows(None)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to count rows: {e}")))?;

        if total == 0 {
            return Ok(Vec::new());
        }

        let mut stream = table
            .query()
            .limit(total)
            .execute()
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to scan table: {e}")))?;

        let mut ids = Vec::with_capacity(total);
        while let Some(batch) = stream.try_next().await.map_err(|e| {
            EngineError::IndexUnavailable(format!("Failed to read scan results: {e}"))
        })? {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .ok_or_else(|| {
                    EngineError::IndexUnavailable("Missing chunk_id column".to_string())
                })?
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| {
                    EngineError::IndexUnavailable("Invalid chunk_id column type".to_string())
                })?;

            for row in 0..batch.num_rows() {
                ids.push(chunk_ids.value(row).to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Drop and recreate the embeddings table. Used when the embedding
    /// identity changes and all vectors must be rebuilt.
    #[inline]
    pub async fn reset(&self) -> Result<(), EngineError> {
        info!("Resetting vector store");

        self.drop_table_if_exists().await?;
        self.initialize_table().await?;

        Ok(())
    }

    /// Compact and reorganize the table for better search performance.
    #[inline]
    pub async fn optimize(&self) -> Result<(), EngineError> {
        let table = self.open_table().await?;

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to optimize table: {e}")))?;

        debug!("Vector store optimization completed");
        Ok(())
    }

    /// Cheap liveness check: can we list tables and count rows.
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool, EngineError> {
        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return Ok(false);
            }
        };

        if !table_names.contains(&TABLE_NAME.to_string()) {
            warn!("Embeddings table missing during integrity check");
            return Ok(false);
        }

        match self.open_table().await {
            Ok(table) => match table.count_rows(None).await {
                Ok(_) => Ok(true),
                Err(e) => {
                    error!("Failed to count rows during integrity check: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("Failed to open table during integrity check: {}", e);
                Ok(false)
            }
        }
    }

    async fn open_table(&self) -> Result<lancedb::Table, EngineError> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to open embeddings table: {e}"))
            })
    }

    async fn drop_table_if_exists(&self) -> Result<(), EngineError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to list tables: {e}")))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            self.connection.drop_table(TABLE_NAME).await.map_err(|e| {
                EngineError::IndexUnavailable(format!("Failed to drop embeddings table: {e}"))
            })?;
        }

        Ok(())
    }

    /// Move a corrupt store directory into a quarantine slot so a fresh
    /// store can be created in its place.
    ///
    /// Slots rotate: `vectors.corrupt.0` is the newest, older ones shift
    /// up, and anything past `MAX_QUARANTINE_SLOTS` is pruned, so repeated
    /// corruption cannot accumulate unbounded debris. When the directory
    /// cannot be moved at all (permissions, cross-device), it is wiped in
    /// place as the last resort.
    fn quarantine_corrupt_store(db_path: &Path) -> Result<(), EngineError> {
        if !db_path.exists() {
            return Ok(());
        }

        let slot = |n: usize| db_path.with_extension(format!("corrupt.{n}"));

        let overflow = slot(MAX_QUARANTINE_SLOTS - 1);
        if overflow.exists() {
            if let Err(e) = std::fs::remove_dir_all(&overflow) {
                warn!("Failed to prune quarantine slot {:?}: {}", overflow, e);
            }
        }
        for n in (0..MAX_QUARANTINE_SLOTS - 1).rev() {
            let from = slot(n);
            if from.exists() {
                if let Err(e) = std::fs::rename(&from, slot(n + 1)) {
                    warn!("Failed to rotate quarantine slot {:?}: {}", from, e);
                }
            }
        }

        match std::fs::rename(db_path, slot(0)) {
            Ok(()) => {
                info!("Quarantined corrupt vector store at {:?}", slot(0));
                Ok(())
            }
            Err(rename_error) => {
                error!(
                    "Failed to quarantine corrupt vector store, wiping in place: {}",
                    rename_error
                );
                std::fs::remove_dir_all(db_path).map_err(|e| {
                    EngineError::IndexUnavailable(format!(
                        "Failed to remove corrupt vector store: {e}"
                    ))
                })
            }
        }
    }
}
