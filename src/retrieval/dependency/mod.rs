#[cfg(test)]
mod tests;

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::Result;
use crate::database::sqlite::{ChunkQueries, ChunkRecord, Database, DepQueries};
use crate::retrieval::intent::Intent;
use crate::retrieval::{
    Candidate, RetrievalMethod, RetrievalQuery, Retriever, matches_filters, sort_candidates,
};

/// Maximum BFS depth over the import/call graph.
pub const MAX_DEPTH: u32 = 3;

/// Per-hop score decay: `0.7^depth`.
pub const DEPTH_DECAY: f64 = 0.7;

/// Upper bound on visited chunks per query; keeps dense graphs from
/// exploding a single walk.
const MAX_VISITED: usize = 200;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("pattern is valid")
});

/// Query words that look like identifiers but never name project symbols.
const SYMBOL_STOPWORDS: &[&str] = &[
    "bug_fix", "follow_up", "to_do", "end_to_end", "TODO", "FIXME", "README", "CamelCase",
    "PascalCase", "snake_case", "AssertionError", "TypeError", "ValueError", "NullPointerException",
];

/// Walks the import/call graph outward from symbols named in the query,
/// breadth-first up to depth 3, scoring by `0.7^depth`. Reverse edges
/// (who calls/imports this) are included for refactor and bug-fix
/// intents.
pub struct DependencyRetriever {
    database: Database,
}

impl DependencyRetriever {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Retriever for DependencyRetriever {
    #[inline]
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Dependency
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Candidate>> {
        let symbols = extract_symbols(&query.text);

        // Shallowest depth wins; revisits at deeper levels are ignored.
        let mut best_depth: HashMap<String, (ChunkRecord, u32)> = HashMap::new();
        let mut frontier: Vec<ChunkRecord> = Vec::new();

        for symbol in &symbols {
            for chunk in ChunkQueries::by_symbol(self.database.pool(), symbol).await? {
                if !best_depth.contains_key(&chunk.chunk_id) {
                    best_depth.insert(chunk.chunk_id.clone(), (chunk.clone(), 0));
                    frontier.push(chunk);
                }
            }
        }

        // The active editor file seeds the walk one hop out, so code
        // related to what the user is looking at surfaces even when the
        // request names no symbol. A selection narrows the seeds to the
        // chunks it touches.
        if let Some(active_file) = &query.active_file {
            for chunk in ChunkQueries::get_by_file(self.database.pool(), active_file).await? {
                if let Some((sel_start, sel_end)) = query.selection {
                    let overlaps = match chunk.line_range() {
                        Some((start, end)) => start <= sel_end && sel_start <= end,
                        None => true,
                    };
                    if !overlaps {
                        continue;
                    }
                }
                if !best_depth.contains_key(&chunk.chunk_id) {
                    best_depth.insert(chunk.chunk_id.clone(), (chunk.clone(), 1));
                    frontier.push(chunk);
                }
            }
        }

        if frontier.is_empty() {
            return Ok(Vec::new());
        }

        let include_reverse = matches!(query.intent, Intent::Refactor | Intent::BugFix);

        let mut depth = 0;
        while !frontier.is_empty() && depth < MAX_DEPTH && best_depth.len() < MAX_VISITED {
            let mut next_frontier: Vec<ChunkRecord> = Vec::new();

            for chunk in &frontier {
                let current_depth = best_depth
                    .get(&chunk.chunk_id)
                    .map(|(_, d)| *d)
                    .unwrap_or(depth);
                let next_depth = current_depth + 1;
                if next_depth > MAX_DEPTH {
                    continue;
                }

                // Forward: symbols this chunk imports or calls.
                for edge in DepQueries::deps_from(self.database.pool(), &chunk.chunk_id).await? {
                    for target in
                        ChunkQueries::by_symbol(self.database.pool(), &edge.dst_symbol_name).await?
                    {
                        visit(&mut best_depth, &mut next_frontier, target, next_depth);
                    }
                }

                // Reverse: chunks that import or call this symbol.
                if include_reverse {
                    if let Some(symbol_name) = &chunk.symbol_name {
                        let dependent_ids =
                            DepQueries::dependents_of(self.database.pool(), symbol_name).await?;
                        for target in
                            ChunkQueries::get_many(self.database.pool(), &dependent_ids).await?
                        {
                            visit(&mut best_depth, &mut next_frontier, target, next_depth);
                        }
                    }
                }

                if best_depth.len() >= MAX_VISITED {
                    break;
                }
            }

            frontier = next_frontier;
            depth += 1;
        }

        let mut candidates: Vec<Candidate> = best_depth
            .into_values()
            .filter(|(chunk, _)| matches_filters(chunk, query))
            .map(|(chunk, depth)| {
                let score = DEPTH_DECAY.powi(depth as i32);
                let mut candidate =
                    Candidate::new(chunk, RetrievalMethod::Dependency, score, score);
                candidate.dep_depth = Some(depth);
                candidate
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(query.limit);

        debug!(
            "Dependency retrieval produced {} candidates from {} query symbols",
            candidates.len(),
            symbols.len()
        );
        Ok(candidates)
    }
}

fn visit(
    best_depth: &mut HashMap<String, (ChunkRecord, u32)>,
    next_frontier: &mut Vec<ChunkRecord>,
    chunk: ChunkRecord,
    depth: u32,
) {
    if best_depth.len() >= MAX_VISITED {
        return;
    }
    if best_depth.contains_key(&chunk.chunk_id) {
        return;
    }
    best_depth.insert(chunk.chunk_id.clone(), (chunk.clone(), depth));
    next_frontier.push(chunk);
}

/// Candidate symbol identifiers from free text: CamelCase or snake_case
/// tokens, minus the stopword list. Plain lowercase words are not
/// treated as symbols.
pub fn extract_symbols(text: &str) -> Vec<String> {
    let mut symbols = Vec::new();

    for token in IDENTIFIER.find_iter(text) {
        let token = token.as_str();
        if SYMBOL_STOPWORDS.contains(&token) {
            continue;
        }
        if !looks_like_symbol(token) {
            continue;
        }
        if !symbols.iter().any(|s| s == token) {
            symbols.push(token.to_string());
        }
    }

    symbols
}

fn looks_like_symbol(token: &str) -> bool {
    if token.len() < 3 {
        return false;
    }

    let has_underscore = token.contains('_');
    let has_lower = token.chars().any(|c| c.is_lowercase());
    let has_upper = token.chars().any(|c| c.is_uppercase());
    let mixed_case = has_lower && has_upper;

    has_underscore || mixed_case
}
