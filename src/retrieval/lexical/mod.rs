#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::Result;
use crate::database::sqlite::{ChunkQueries, Database, FtsHit, identifier_terms};
use crate::retrieval::{
    Candidate, RetrievalMethod, RetrievalQuery, Retriever, matches_filters, sort_candidates,
};

/// BM25 hits below this (after normalization) are dropped unless the
/// query overrides the floor.
pub const DEFAULT_MIN_SCORE: f64 = 0.1;

/// Fixed BM25 normalization constant: `s / (s + K_NORM)`.
pub const K_NORM: f64 = 10.0;

/// Full-text retriever over identifier-split tokens.
pub struct LexicalRetriever {
    database: Database,
}

impl LexicalRetriever {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn search(&self, terms: &[String], limit: usize) -> Result<Vec<FtsHit>> {
        let match_query = build_match_query(terms);
        Ok(ChunkQueries::full_text_search(self.database.pool(), &match_query, terms, limit).await?)
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    #[inline]
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Lexical
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Candidate>> {
        let mut terms = identifier_terms(&query.text);
        if terms.is_empty() {
            // Identifier splitting stripped everything; fall back to
            // plain whitespace terms.
            terms = whitespace_terms(&query.text);
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits = match self.search(&terms, query.limit).await {
            Ok(hits) => hits,
            Err(e) => {
                // A malformed FTS expression falls back to whitespace
                // tokens before giving up.
                warn!("FTS query failed, retrying with whitespace terms: {e}");
                let fallback = whitespace_terms(&query.text);
                if fallback.is_empty() {
                    return Ok(Vec::new());
                }
                self.search(&fallback, query.limit).await?
            }
        };

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let chunks = ChunkQueries::get_many(self.database.pool(), &ids).await?;
        let by_id: HashMap<&str, _> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

        let min_score = query.min_score.unwrap_or(DEFAULT_MIN_SCORE);

        let mut candidates = Vec::new();
        for hit in &hits {
            let score = hit.score / (hit.score + K_NORM);
            if score < min_score {
                continue;
            }

            let Some(chunk) = by_id.get(hit.chunk_id.as_str()) else {
                continue;
            };
            if !matches_filters(chunk, query) {
                continue;
            }

            let mut candidate = Candidate::new(
                (*chunk).clone(),
                RetrievalMethod::Lexical,
                score,
                hit.score,
            );
            candidate.matched_terms = Some(hit.matched_terms.clone());
            candidates.push(candidate);
        }

        sort_candidates(&mut candidates);
        candidates.truncate(query.limit);

        debug!("Lexical retrieval produced {} candidates", candidates.len());
        Ok(candidates)
    }
}

/// Build the FTS5 query: the full phrase preferred, individual terms as
/// fallback (`"t1 t2 ... tn" OR t1 OR t2 ... OR tn`).
pub fn build_match_query(terms: &[String]) -> String {
    if terms.len() == 1 {
        return terms[0].clone();
    }

    let phrase = format!("\"{}\"", terms.join(" "));
    let alternatives = terms.join(" OR ");
    format!("{phrase} OR {alternatives}")
}

/// Sanitized whitespace-only tokenization used as the degraded fallback.
fn whitespace_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() >= 2 && !terms.contains(&cleaned) {
            terms.push(cleaned);
        }
    }
    terms
}
