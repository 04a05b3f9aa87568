
use super::models::*;
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// A full-text search hit before chunk resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsHit {
    pub chunk_id: String,
    /// Positive bm25 relevance (FTS5 `rank` negated).
    pub score: f64,
    pub matched_terms: Vec<String>,
}

pub struct ChunkQueries;

impl ChunkQueries {
    pub async fn upsert(pool: &SqlitePool, chunk: &ChunkRecord) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin upsert")?;
        Self::upsert_in_tx(&mut tx, chunk).await?;
        tx.commit().await.context("Failed to commit upsert")?;
        Ok(())
    }

    async fn upsert_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chunk: &ChunkRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chunks
                (chunk_id, file_path, line_start, line_end, language,
                 symbol_name, symbol_type, last_modified, content_hash, content)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.file_path)
        .bind(chunk.line_start)
        .bind(chunk.line_end)
        .bind(&chunk.language)
        .bind(&chunk.symbol_name)
        .bind(chunk.symbol_type)
        .bind(chunk.last_modified)
        .bind(&chunk.content_hash)
        .bind(&chunk.content)
        .execute(&mut **tx)
        .await
        .context("Failed to upsert chunk")?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.chunk_id)
            .execute(&mut **tx)
            .await
            .context("Failed to clear FTS row")?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, tokens) VALUES (?, ?)")
            .bind(&chunk.chunk_id)
            .bind(fts_tokens(&chunk.content))
            .execute(&mut **tx)
            .await
            .context("Failed to insert FTS row")?;

        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, chunk_id: &str) -> Result<bool> {
        let mut tx = pool.begin().await.context("Failed to begin delete")?;
        let deleted = Self::delete_in_tx(&mut tx, chunk_id).await?;
        tx.commit().await.context("Failed to commit delete")?;
        Ok(deleted)
    }

    async fn delete_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chunk_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut **tx)
            .await
            .context("Failed to delete chunk")?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut **tx)
            .await
            .context("Failed to delete FTS row")?;

        sqlx::query("DELETE FROM deps WHERE src_chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut **tx)
            .await
            .context("Failed to delete dependency edges")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(pool: &SqlitePool, chunk_id: &str) -> Result<Option<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRecord>("SELECT * FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get chunk by id")
    }

    /// Resolve a set of ids to chunk records. Missing ids are silently
    /// absent from the result.
    pub async fn get_many(pool: &SqlitePool, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM chunks WHERE chunk_id IN ({placeholders}) \
             ORDER BY file_path ASC, line_start ASC"
        );

        let mut query = sqlx::query_as::<_, ChunkRecord>(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }

        query
            .fetch_all(pool)
            .await
            .context("Failed to get chunks by ids")
    }

    pub async fn get_by_file(pool: &SqlitePool, file_path: &str) -> Result<Vec<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRecord>(
            "SELECT * FROM chunks WHERE file_path = ? ORDER BY line_start ASC, chunk_id ASC",
        )
        .bind(file_path)
        .fetch_all(pool)
        .await
        .context("Failed to get chunks by file")
    }

    /// Apply a per-file delta atomically: delete the given chunk ids,
    /// insert the new chunks, and replace dependency edges for inserted
    /// chunks. Readers never observe a partial chunk set for the file.
    pub async fn apply_file_delta(
        pool: &SqlitePool,
        deleted_chunk_ids: &[String],
        inserted: &[(ChunkRecord, Vec<DepEdge>)],
    ) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin file delta")?;

        for chunk_id in deleted_chunk_ids {
            Self::delete_in_tx(&mut tx, chunk_id).await?;
        }

        for (chunk, edges) in inserted {
            Self::upsert_in_tx(&mut tx, chunk).await?;
            DepQueries::insert_in_tx(&mut tx, edges).await?;
        }

        tx.commit().await.context("Failed to commit file delta")?;
        Ok(())
    }

    /// Delete every chunk of a file. Returns the removed chunk ids so the
    /// caller can mirror the deletion in the vector store.
    pub async fn delete_by_file(pool: &SqlitePool, file_path: &str) -> Result<Vec<String>> {
        let existing = Self::get_by_file(pool, file_path).await?;
        let ids: Vec<String> = existing.into_iter().map(|c| c.chunk_id).collect();

        let mut tx = pool.begin().await.context("Failed to begin file delete")?;
        for chunk_id in &ids {
            Self::delete_in_tx(&mut tx, chunk_id).await?;
        }
        tx.commit().await.context("Failed to commit file delete")?;

        Ok(ids)
    }

    /// BM25 full-text search over identifier-split tokens.
    ///
    /// `match_query` must already be valid FTS5 syntax; `terms` are the
    /// sanitized query terms used to report `matched_terms` per hit.
    pub async fn full_text_search(
        pool: &SqlitePool,
        match_query: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<FtsHit>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, tokens, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank ASC, chunk_id ASC
            LIMIT ?
            "#,
        )
        .bind(match_query)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .context("Failed to run full-text search")?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let tokens: String = row.get("tokens");
                let token_set: std::collections::HashSet<&str> =
                    tokens.split_whitespace().collect();
                let matched_terms = terms
                    .iter()
                    .filter(|term| token_set.contains(term.as_str()))
                    .cloned()
                    .collect();

                FtsHit {
                    chunk_id: row.get("chunk_id"),
                    // FTS5 rank is negated bm25: more negative is better.
                    score: -rank,
                    matched_terms,
                }
            })
            .collect();

        Ok(hits)
    }

    /// Chunks modified at or after `before_ms`, newest first.
    pub async fn recent(pool: &SqlitePool, before_ms: i64, limit: usize) -> Result<Vec<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRecord>(
            r#"
            SELECT * FROM chunks
            WHERE last_modified >= ?
            ORDER BY last_modified DESC, chunk_id ASC
            LIMIT ?
            "#,
        )
        .bind(before_ms)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .context("Failed to query recent chunks")
    }

    /// Exact symbol lookup for dependency seeding.
    pub async fn by_symbol(pool: &SqlitePool, symbol_name: &str) -> Result<Vec<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRecord>(
            r#"
            SELECT * FROM chunks
            WHERE symbol_name = ?
            ORDER BY file_path ASC, line_start ASC
            "#,
        )
        .bind(symbol_name)
        .fetch_all(pool)
        .await
        .context("Failed to query chunks by symbol")
    }

    /// Every indexed file with its newest chunk timestamp, for startup
    /// replay against filesystem state.
    pub async fn list_files(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT file_path, MAX(last_modified) AS last_modified \
             FROM chunks GROUP BY file_path ORDER BY file_path ASC",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list indexed files")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("file_path"), row.get("last_modified")))
            .collect())
    }

    pub async fn list_all_chunk_ids(pool: &SqlitePool) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT chunk_id FROM chunks ORDER BY chunk_id ASC")
            .fetch_all(pool)
            .await
            .context("Failed to list chunk ids")?;

        Ok(rows.iter().map(|row| row.get("chunk_id")).collect())
    }

    /// Drop every row from all three tables. Used when the index header
    /// mismatches and the index must be rebuilt from scratch.
    pub async fn clear_all(pool: &SqlitePool) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin clear")?;

        sqlx::query("DELETE FROM chunks")
            .execute(&mut *tx)
            .await
            .context("Failed to clear chunks")?;
        sqlx::query("DELETE FROM chunks_fts")
            .execute(&mut *tx)
            .await
            .context("Failed to clear FTS rows")?;
        sqlx::query("DELETE FROM deps")
            .execute(&mut *tx)
            .await
            .context("Failed to clear dependency edges")?;

        tx.commit().await.context("Failed to commit clear")?;
        Ok(())
    }

    pub async fn stats(pool: &SqlitePool) -> Result<StoreStats> {
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        let file_count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT file_path) FROM chunks")
                .fetch_one(pool)
                .await
                .context("Failed to count files")?;

        let dep_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deps")
            .fetch_one(pool)
            .await
            .context("Failed to count dependency edges")?;

        Ok(StoreStats {
            chunk_count,
            file_count,
            dep_count,
        })
    }
}

pub struct DepQueries;

impl DepQueries {
    pub async fn insert_all(pool: &SqlitePool, edges: &[DepEdge]) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin edge insert")?;
        Self::insert_in_tx(&mut tx, edges).await?;
        tx.commit().await.context("Failed to commit edge insert")?;
        Ok(())
    }

    async fn insert_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        edges: &[DepEdge],
    ) -> Result<()> {
        for edge in edges {
            sqlx::query(
                "INSERT OR IGNORE INTO deps (src_chunk_id, dst_symbol_name, kind) VALUES (?, ?, ?)",
            )
            .bind(&edge.src_chunk_id)
            .bind(&edge.dst_symbol_name)
            .bind(edge.kind)
            .execute(&mut **tx)
            .await
            .context("Failed to insert dependency edge")?;
        }
        Ok(())
    }

    /// Outgoing edges of a chunk: the symbol names it imports or calls.
    pub async fn deps_from(pool: &SqlitePool, src_chunk_id: &str) -> Result<Vec<DepEdge>> {
        sqlx::query_as::<_, DepEdge>(
            "SELECT * FROM deps WHERE src_chunk_id = ? ORDER BY dst_symbol_name ASC, kind ASC",
        )
        .bind(src_chunk_id)
        .fetch_all(pool)
        .await
        .context("Failed to query outgoing edges")
    }

    /// Reverse lookup: ids of chunks that import or call a symbol.
    pub async fn dependents_of(pool: &SqlitePool, symbol_name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT src_chunk_id FROM deps \
             WHERE dst_symbol_name = ? ORDER BY src_chunk_id ASC",
        )
        .bind(symbol_name)
        .fetch_all(pool)
        .await
        .context("Failed to query dependents")?;

        Ok(rows.iter().map(|row| row.get("src_chunk_id")).collect())
    }
}

/// Derive the FTS token stream for chunk content: identifiers split on
/// case and underscore boundaries, case-folded, joined by spaces. Whole
/// identifiers are kept alongside their parts so exact lookups still hit.
pub fn fts_tokens(content: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for word in split_words(content) {
        let lowered = word.to_lowercase();
        let parts = split_identifier(&word);
        if parts.len() > 1 && lowered.len() >= 2 {
            out.push(lowered);
        }
        for part in parts {
            if part.len() >= 2 {
                out.push(part);
            }
        }
    }

    out.join(" ")
}

/// Sanitize free text into case-folded search terms, splitting identifiers
/// the same way `fts_tokens` does.
pub fn identifier_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in split_words(text) {
        for part in split_identifier(&word) {
            if part.len() >= 2 && !terms.contains(&part) {
                terms.push(part);
            }
        }
    }
    terms
}

fn split_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Split one identifier into case-folded parts on CamelCase and snake_case
/// boundaries.
pub fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in word.chars() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = false;
            continue;
        }

        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(current.to_lowercase());
            current.clear();
        }

        prev_lower = c.is_lowercase() || c.is_numeric();
        current.push(c);
    }

    if !current.is_empty() {
        parts.push(current.to_lowercase());
    }

    parts
}
