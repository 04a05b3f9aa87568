
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::retrieval::strategy::RetrievalStrategy;
use crate::retrieval::{Candidate, RetrievalMethod, sort_candidates};

/// Reciprocal rank fusion constant.
pub const RRF_K: f64 = 60.0;

/// Content-overlap threshold above which two candidates are duplicates.
pub const JACCARD_THRESHOLD: f64 = 0.9;

/// Merge per-retriever candidate lists into one deduplicated list.
///
/// Each list contributes `weight / (k + rank + 1)` per candidate, with
/// ranks 0-based and weights from the strategy. Accumulated scores are
/// normalized into `[0, 1]` with `s / (s + 1)`. The retained candidate
/// keeps the annotations of its highest-scored original appearance.
pub fn fuse(
    lists: &[(RetrievalMethod, Vec<Candidate>)],
    strategy: &RetrievalStrategy,
) -> Vec<Candidate> {
    struct Accumulated {
        rrf: f64,
        best: Candidate,
    }

    let mut by_chunk: HashMap<String, Accumulated> = HashMap::new();

    for (method, list) in lists {
        let weight = strategy.weight(*method);
        if weight <= 0.0 {
            continue;
        }

        for (rank, candidate) in list.iter().enumerate() {
            let contribution = weight / (RRF_K + rank as f64 + 1.0);

            match by_chunk.get_mut(&candidate.chunk.chunk_id) {
                Some(entry) => {
                    entry.rrf += contribution;
                    if candidate.score > entry.best.score {
                        entry.best = candidate.clone();
                    }
                }
                None => {
                    by_chunk.insert(
                        candidate.chunk.chunk_id.clone(),
                        Accumulated {
                            rrf: contribution,
                            best: candidate.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<Candidate> = by_chunk
        .into_values()
        .map(|entry| {
            let mut candidate = entry.best;
            candidate.raw_score = entry.rrf;
            candidate.score = entry.rrf / (entry.rrf + 1.0);
            candidate
        })
        .collect();

    sort_candidates(&mut fused);

    let deduplicated = deduplicate(fused);
    debug!("Fusion produced {} candidates", deduplicated.len());
    deduplicated
}

/// Drop near-duplicates, keeping the higher-scored candidate. Two
/// candidates are duplicates when they cover overlapping lines of the
/// same file, or when their token sets overlap at Jaccard ≥ 0.9.
fn deduplicate(sorted: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    let mut kept_tokens: Vec<HashSet<String>> = Vec::new();

    for candidate in sorted {
        let tokens = content_tokens(&candidate.chunk.content);

        let duplicate = kept.iter().zip(&kept_tokens).any(|(existing, existing_tokens)| {
            if existing.chunk.file_path == candidate.chunk.file_path
                && ranges_overlap(
                    existing.chunk.line_range(),
                    candidate.chunk.line_range(),
                )
            {
                return true;
            }
            jaccard(existing_tokens, &tokens) >= JACCARD_THRESHOLD
        });

        if !duplicate {
            kept.push(candidate);
            kept_tokens.push(tokens);
        }
    }

    kept
}

/// Whole-file entries overlap everything in the same file.
fn ranges_overlap(a: Option<(u32, u32)>, b: Option<(u32, u32)>) -> bool {
    match (a, b) {
        (Some((a_start, a_end)), Some((b_start, b_end))) => {
            a_start <= b_end && b_start <= a_end
        }
        _ => true,
    }
}

/// Case-folded content tokens longer than two characters.
fn content_tokens(content: &str) -> HashSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}
