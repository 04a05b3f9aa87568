
use async_trait::async_trait;
use tracing::debug;

use crate::Result;
use crate::database::sqlite::{ChunkQueries, Database};
use crate::retrieval::{
    Candidate, RetrievalMethod, RetrievalQuery, Retriever, matches_filters, sort_candidates,
};

/// Sliding lookback window.
pub const WINDOW_HOURS: i64 = 24;

/// Score decay rate per hour of age: `exp(-0.5 · Δhours)`.
pub const DECAY_PER_HOUR: f64 = 0.5;

/// Overfetch factor so the keyword post-filter still has enough to pick
/// from.
const FETCH_FACTOR: usize = 4;

/// Surfaces chunks edited inside the last 24 hours, newest scoring
/// highest, post-filtered by a coarse keyword match against the query.
pub struct RecentEditsRetriever {
    database: Database,
}

impl RecentEditsRetriever {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Retriever for RecentEditsRetriever {
    #[inline]
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::RecentEdits
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Candidate>> {
        let window_start = query.now_ms - WINDOW_HOURS * 60 * 60 * 1000;
        let fetch_limit = query.limit.saturating_mul(FETCH_FACTOR).max(query.limit);

        let recent =
            ChunkQueries::recent(self.database.pool(), window_start, fetch_limit).await?;
        if recent.is_empty() {
            return Ok(Vec::new());
        }

        let keywords = coarse_keywords(&query.text);

        let mut candidates = Vec::new();
        for chunk in recent {
            if !matches_filters(&chunk, query) {
                continue;
            }
            if !keywords.is_empty() && !keyword_match(&keywords, &chunk.file_path, &chunk.content) {
                continue;
            }

            let age_ms = (query.now_ms - chunk.last_modified).max(0);
            let age_hours = age_ms as f64 / (60.0 * 60.0 * 1000.0);
            let score = (-DECAY_PER_HOUR * age_hours).exp().clamp(0.0, 1.0);

            candidates.push(Candidate::new(
                chunk,
                RetrievalMethod::RecentEdits,
                score,
                age_hours,
            ));
        }

        sort_candidates(&mut candidates);
        candidates.truncate(query.limit);

        debug!(
            "Recent-edits retrieval produced {} candidates",
            candidates.len()
        );
        Ok(candidates)
    }
}

/// Query tokens of at least three characters, case-folded.
fn coarse_keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Any keyword appearing in the content or the file path counts as a
/// match.
fn keyword_match(keywords: &[String], file_path: &str, content: &str) -> bool {
    let path = file_path.to_lowercase();
    let content = content.to_lowercase();

    keywords
        .iter()
        .any(|k| path.contains(k.as_str()) || content.contains(k.as_str()))
}
