#[cfg(test)]
mod tests;

use std::collections::HashMap;
use tracing::debug;

use crate::database::sqlite::SymbolType;
use crate::retrieval::intent::Intent;
use crate::retrieval::{Candidate, sort_candidates};

const METHOD_WEIGHT: f64 = 0.50;
const RECENCY_WEIGHT: f64 = 0.20;
const FILE_TYPE_WEIGHT: f64 = 0.15;
const SYMBOL_TYPE_WEIGHT: f64 = 0.15;

/// Recency decay rate per hour of age.
const RECENCY_DECAY: f64 = 0.1;

/// Re-score fused candidates with intent-aware signals and apply the
/// per-file diversity penalty.
///
/// `final = 0.50·method + 0.20·recency + 0.15·file_type_fit +
/// 0.15·symbol_type_fit`, all signals in `[0, 1]`.
pub fn rank(mut candidates: Vec<Candidate>, intent: Intent, now_ms: i64) -> Vec<Candidate> {
    for candidate in &mut candidates {
        let method_score = candidate.score;
        let recency = recency_score(candidate.chunk.last_modified, now_ms);
        let file_fit = file_type_fit(candidate, intent);
        let symbol_fit = symbol_type_fit(candidate.chunk.symbol_type, intent);

        candidate.score = METHOD_WEIGHT * method_score
            + RECENCY_WEIGHT * recency
            + FILE_TYPE_WEIGHT * file_fit
            + SYMBOL_TYPE_WEIGHT * symbol_fit;
    }

    sort_candidates(&mut candidates);
    apply_diversity_penalty(&mut candidates);
    sort_candidates(&mut candidates);

    debug!("Ranked {} candidates", candidates.len());
    candidates
}

/// `exp(-0.1 · age_hours)`; chunks without a timestamp sit at 0.5.
fn recency_score(last_modified: i64, now_ms: i64) -> f64 {
    if last_modified <= 0 {
        return 0.5;
    }

    let age_ms = (now_ms - last_modified).max(0);
    let age_hours = age_ms as f64 / (60.0 * 60.0 * 1000.0);
    (-RECENCY_DECAY * age_hours).exp().clamp(0.0, 1.0)
}

fn file_type_fit(candidate: &Candidate, intent: Intent) -> f64 {
    let is_test = candidate.chunk.is_test_file();

    match intent {
        Intent::Test => {
            if is_test {
                1.0
            } else {
                0.3
            }
        }
        Intent::BugFix => {
            if is_test {
                0.2
            } else {
                1.0
            }
        }
        Intent::Refactor => {
            if is_test {
                0.3
            } else {
                1.0
            }
        }
        Intent::Explain | Intent::Generate => 0.5,
    }
}

fn symbol_type_fit(symbol_type: Option<SymbolType>, intent: Intent) -> f64 {
    match (intent, symbol_type) {
        (Intent::Refactor, Some(SymbolType::Class | SymbolType::Function)) => 1.0,
        (Intent::Generate, Some(SymbolType::Function | SymbolType::Method)) => 1.0,
        _ => 0.5,
    }
}

/// In final-score order, the n-th candidate from a file is multiplied by
/// `1/(1+n)`; the first from each file is untouched.
fn apply_diversity_penalty(sorted: &mut [Candidate]) {
    let mut seen_per_file: HashMap<&str, usize> = HashMap::new();

    // Collect penalties first so the borrow of file paths ends before
    // the mutation pass.
    let penalties: Vec<f64> = sorted
        .iter()
        .map(|candidate| {
            let n = seen_per_file
                .entry(candidate.chunk.file_path.as_str())
                .or_insert(0);
            let penalty = 1.0 / (1.0 + *n as f64);
            *n += 1;
            penalty
        })
        .collect();

    for (candidate, penalty) in sorted.iter_mut().zip(penalties) {
        candidate.score *= penalty;
    }
}
