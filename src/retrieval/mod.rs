// Retrieval module
// Intent classification, strategy selection, the four retrievers, rank
// fusion, and the final ranker.

pub mod dependency;
pub mod fusion;
pub mod intent;
pub mod lexical;
pub mod ranker;
pub mod recent;
pub mod semantic;
pub mod strategy;

pub use dependency::DependencyRetriever;
pub use intent::{Intent, IntentClassifier};
pub use lexical::LexicalRetriever;
pub use recent::RecentEditsRetriever;
pub use semantic::SemanticRetriever;
pub use strategy::RetrievalStrategy;

use async_trait::async_trait;
use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::database::sqlite::ChunkRecord;

/// The four retrieval methods, used as telemetry discriminators and as
/// indices into fixed-shape weight arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Semantic,
    Lexical,
    Dependency,
    RecentEdits,
}

impl RetrievalMethod {
    pub const ALL: [RetrievalMethod; 4] = [
        RetrievalMethod::Semantic,
        RetrievalMethod::Lexical,
        RetrievalMethod::Dependency,
        RetrievalMethod::RecentEdits,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMethod::Semantic => "semantic",
            RetrievalMethod::Lexical => "lexical",
            RetrievalMethod::Dependency => "dependency",
            RetrievalMethod::RecentEdits => "recent_edits",
        }
    }

    /// Stable index into `[f64; 4]` weight arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            RetrievalMethod::Semantic => 0,
            RetrievalMethod::Lexical => 1,
            RetrievalMethod::Dependency => 2,
            RetrievalMethod::RecentEdits => 3,
        }
    }
}

impl std::fmt::Display for RetrievalMethod {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scored, annotated chunk emerging from a retriever.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: ChunkRecord,
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    /// Method-native score before normalization.
    pub raw_score: f64,
    pub method: RetrievalMethod,
    /// Query terms that matched (lexical only).
    pub matched_terms: Option<Vec<String>>,
    /// Graph distance from a seed symbol (dependency only).
    pub dep_depth: Option<u32>,
}

impl Candidate {
    #[inline]
    pub fn new(chunk: ChunkRecord, method: RetrievalMethod, score: f64, raw_score: f64) -> Self {
        Self {
            chunk,
            score,
            raw_score,
            method,
            matched_terms: None,
            dep_depth: None,
        }
    }
}

/// The shared retriever input.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub limit: usize,
    /// Overrides the retriever's default score floor.
    pub min_score: Option<f64>,
    /// Glob or substring patterns on the workspace-relative path.
    pub file_patterns: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub intent: Intent,
    /// File currently open in the editor, if any.
    pub active_file: Option<String>,
    /// Selected line range inside `active_file`, 1-based inclusive.
    pub selection: Option<(u32, u32)>,
    /// Query-time anchor for recency math, milliseconds since the epoch.
    pub now_ms: i64,
}

/// Shared retriever contract: candidates sorted by score descending, at
/// most `limit` of them, possibly none.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Candidate>>;
}

/// Sort by score descending with the deterministic tie-break on
/// `(file_path, line_start)` ascending.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.tie_break_line().cmp(&b.chunk.tie_break_line()))
    });
}

/// Post-hoc file/language filters shared by all retrievers.
pub(crate) fn matches_filters(chunk: &ChunkRecord, query: &RetrievalQuery) -> bool {
    if let Some(languages) = &query.languages {
        if !languages.iter().any(|l| l == &chunk.language) {
            return false;
        }
    }

    if let Some(patterns) = &query.file_patterns {
        let matched = patterns.iter().any(|pattern| {
            if chunk.file_path.contains(pattern.as_str()) {
                return true;
            }
            Glob::new(pattern)
                .map(|g| g.compile_matcher().is_match(&chunk.file_path))
                .unwrap_or(false)
        });
        if !matched {
            return false;
        }
    }

    true
}
