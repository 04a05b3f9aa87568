use super::*;
use crate::database::sqlite::ChunkRecord;
use crate::retrieval::RetrievalMethod;

const NOW_MS: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 60 * 60 * 1000;

fn candidate(
    path: &str,
    line: u32,
    symbol_type: Option<SymbolType>,
    last_modified: i64,
    score: f64,
) -> Candidate {
    let chunk = ChunkRecord::new(
        path,
        Some((line, line + 5)),
        "rust",
        None,
        symbol_type,
        last_modified,
        format!("fn body_at_{path}_{line}() {{}}"),
    );
    Candidate::new(chunk, RetrievalMethod::Semantic, score, score)
}

#[test]
fn final_score_is_the_weighted_sum() {
    let ranked = rank(
        vec![candidate(
            "src/a.rs",
            1,
            Some(SymbolType::Function),
            NOW_MS,
            0.8,
        )],
        Intent::Explain,
        NOW_MS,
    );

    // method 0.8, recency 1.0 (age zero), file fit 0.5, symbol fit 0.5.
    let expected = 0.50 * 0.8 + 0.20 * 1.0 + 0.15 * 0.5 + 0.15 * 0.5;
    assert!((ranked[0].score - expected).abs() < 1e-9);
}

#[test]
fn missing_timestamp_uses_neutral_recency() {
    let ranked = rank(
        vec![candidate("src/a.rs", 1, None, 0, 0.8)],
        Intent::Explain,
        NOW_MS,
    );

    let expected = 0.50 * 0.8 + 0.20 * 0.5 + 0.15 * 0.5 + 0.15 * 0.5;
    assert!((ranked[0].score - expected).abs() < 1e-9);
}

#[test]
fn test_intent_prefers_test_files() {
    let ranked = rank(
        vec![
            candidate("src/auth.rs", 1, None, 0, 0.5),
            candidate("src/auth.test.ts", 1, None, 0, 0.5),
        ],
        Intent::Test,
        NOW_MS,
    );

    assert_eq!(ranked[0].chunk.file_path, "src/auth.test.ts");
}

#[test]
fn bug_fix_intent_penalizes_test_files_harder_than_refactor() {
    let impl_candidate = candidate("src/auth.rs", 1, None, 0, 0.5);
    let test_candidate = candidate("src/auth.spec.ts", 1, None, 0, 0.5);

    let bug_fix = rank(
        vec![impl_candidate.clone(), test_candidate.clone()],
        Intent::BugFix,
        NOW_MS,
    );
    let refactor = rank(vec![impl_candidate, test_candidate], Intent::Refactor, NOW_MS);

    assert_eq!(bug_fix[0].chunk.file_path, "src/auth.rs");
    assert_eq!(refactor[0].chunk.file_path, "src/auth.rs");

    let bug_fix_test = bug_fix
        .iter()
        .find(|c| c.chunk.is_test_file())
        .expect("test candidate present");
    let refactor_test = refactor
        .iter()
        .find(|c| c.chunk.is_test_file())
        .expect("test candidate present");
    assert!(bug_fix_test.score < refactor_test.score);
}

#[test]
fn refactor_intent_boosts_classes_and_functions() {
    let ranked = rank(
        vec![
            candidate("src/a.rs", 1, Some(SymbolType::Constant), 0, 0.5),
            candidate("src/b.rs", 1, Some(SymbolType::Class), 0, 0.5),
        ],
        Intent::Refactor,
        NOW_MS,
    );

    assert_eq!(ranked[0].chunk.file_path, "src/b.rs");
}

#[test]
fn fresher_chunks_outrank_stale_ones() {
    let ranked = rank(
        vec![
            candidate("src/stale.rs", 1, None, NOW_MS - 48 * HOUR_MS, 0.5),
            candidate("src/fresh.rs", 1, None, NOW_MS - HOUR_MS, 0.5),
        ],
        Intent::Explain,
        NOW_MS,
    );

    assert_eq!(ranked[0].chunk.file_path, "src/fresh.rs");
}

#[test]
fn diversity_penalty_halves_second_hit_from_same_file() {
    let ranked = rank(
        vec![
            candidate("src/a.rs", 1, None, 0, 0.9),
            candidate("src/a.rs", 50, None, 0, 0.9),
            candidate("src/a.rs", 100, None, 0, 0.9),
        ],
        Intent::Explain,
        NOW_MS,
    );

    // Same base score, so penalties are ×1, ×1/2, ×1/3 in line order.
    assert!((ranked[0].score / ranked[1].score - 2.0).abs() < 1e-9);
    assert!((ranked[0].score / ranked[2].score - 3.0).abs() < 1e-9);
    assert_eq!(ranked[0].chunk.tie_break_line(), 1);
}

#[test]
fn diversity_penalty_lets_other_files_through() {
    let ranked = rank(
        vec![
            candidate("src/a.rs", 1, None, 0, 0.9),
            candidate("src/a.rs", 50, None, 0, 0.85),
            candidate("src/b.rs", 1, None, 0, 0.6),
        ],
        Intent::Explain,
        NOW_MS,
    );

    // The second chunk of a.rs is halved below b.rs's untouched score.
    assert_eq!(ranked[0].chunk.file_path, "src/a.rs");
    assert_eq!(ranked[1].chunk.file_path, "src/b.rs");
    assert_eq!(ranked[2].chunk.file_path, "src/a.rs");
}

#[test]
fn ties_break_on_path_then_line() {
    let ranked = rank(
        vec![
            candidate("src/b.rs", 1, None, 0, 0.5),
            candidate("src/a.rs", 9, None, 0, 0.5),
        ],
        Intent::Explain,
        NOW_MS,
    );

    assert_eq!(ranked[0].chunk.file_path, "src/a.rs");
    assert_eq!(ranked[1].chunk.file_path, "src/b.rs");
}
