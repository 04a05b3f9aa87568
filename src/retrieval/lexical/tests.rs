use super::*;
use crate::database::sqlite::{ChunkRecord, SymbolType};
use crate::retrieval::intent::Intent;
use tempfile::TempDir;

async fn setup() -> (LexicalRetriever, Database, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("database");
    let retriever = LexicalRetriever::new(database.clone());
    (retriever, database, dir)
}

async fn index_chunk(database: &Database, path: &str, symbol: &str, content: &str) -> ChunkRecord {
    let chunk = ChunkRecord::new(
        path,
        Some((1, 10)),
        "rust",
        Some(symbol.to_string()),
        Some(SymbolType::Function),
        0,
        content,
    );
    ChunkQueries::upsert(database.pool(), &chunk)
        .await
        .expect("upsert");
    chunk
}

fn query(text: &str) -> RetrievalQuery {
    RetrievalQuery {
        text: text.to_string(),
        limit: 10,
        // BM25 IDF is tiny in a one-document corpus, so these tests
        // disable the production floor; the floor itself is covered by
        // `default_floor_drops_low_idf_matches`.
        min_score: Some(0.0),
        file_patterns: None,
        languages: None,
        intent: Intent::Explain,
        active_file: None,
        selection: None,
        now_ms: 0,
    }
}

#[tokio::test]
async fn finds_chunks_by_identifier_terms() {
    let (retriever, database, _dir) = setup().await;

    let hit = index_chunk(
        &database,
        "src/session.rs",
        "refreshSessionToken",
        "fn refreshSessionToken(token: Token) -> Token { token.renew() }",
    )
    .await;
    index_chunk(
        &database,
        "src/chart.rs",
        "render",
        "fn render(canvas: &mut Canvas) { canvas.clear(); }",
    )
    .await;

    let candidates = retriever
        .retrieve(&query("where is the session token refreshed?"))
        .await
        .expect("retrieve");

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].chunk.chunk_id, hit.chunk_id);
    assert_eq!(candidates[0].method, RetrievalMethod::Lexical);

    let matched = candidates[0].matched_terms.as_ref().expect("matched terms");
    assert!(matched.contains(&"session".to_string()));
    assert!(matched.contains(&"token".to_string()));
}

#[tokio::test]
async fn scores_are_normalized_into_unit_interval() {
    let (retriever, database, _dir) = setup().await;

    index_chunk(
        &database,
        "src/a.rs",
        "parse_config",
        "fn parse_config(path: &str) -> Config { Config::from(path) }",
    )
    .await;

    let candidates = retriever
        .retrieve(&query("parse config"))
        .await
        .expect("retrieve");

    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].score > 0.0 && candidates[0].score < 1.0);
    // raw bm25 is positive and larger than its normalized form.
    assert!(candidates[0].raw_score > candidates[0].score);
}

#[tokio::test]
async fn default_floor_drops_low_idf_matches() {
    let (retriever, database, _dir) = setup().await;

    index_chunk(
        &database,
        "src/a.rs",
        "parse_config",
        "fn parse_config(path: &str) -> Config { Config::from(path) }",
    )
    .await;

    // With a single-document corpus the bm25 score stays well under
    // the normalization knee, so the default 0.1 floor filters it.
    let mut with_floor = query("parse config");
    with_floor.min_score = None;

    let candidates = retriever.retrieve(&with_floor).await.expect("retrieve");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn no_match_returns_empty() {
    let (retriever, database, _dir) = setup().await;

    index_chunk(&database, "src/a.rs", "alpha", "fn alpha() {}").await;

    let candidates = retriever
        .retrieve(&query("zebra quantum lattice"))
        .await
        .expect("retrieve");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn punctuation_only_query_returns_empty() {
    let (retriever, database, _dir) = setup().await;
    index_chunk(&database, "src/a.rs", "alpha", "fn alpha() {}").await;

    let candidates = retriever.retrieve(&query("?!... ::")).await.expect("retrieve");
    assert!(candidates.is_empty());
}

#[test]
fn match_query_prefers_phrase_with_term_fallback() {
    let terms = vec!["parse".to_string(), "config".to_string(), "file".to_string()];
    assert_eq!(
        build_match_query(&terms),
        "\"parse config file\" OR parse OR config OR file"
    );

    let single = vec!["parse".to_string()];
    assert_eq!(build_match_query(&single), "parse");
}
