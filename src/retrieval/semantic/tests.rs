use super::*;
use crate::database::lancedb::EmbeddingRecord;
use crate::database::sqlite::{ChunkRecord, SymbolType};
use crate::embeddings::HashingProvider;
use crate::retrieval::intent::Intent;
use tempfile::TempDir;

const DIMENSION: usize = 64;

async fn setup() -> (SemanticRetriever, Database, Arc<VectorStore>, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("database");
    let vector_store = Arc::new(
        VectorStore::new(&dir.path().join("vectors"), DIMENSION)
            .await
            .expect("vector store"),
    );
    let embedder = Arc::new(HashingProvider::new(DIMENSION));

    let retriever = SemanticRetriever::new(
        database.clone(),
        Arc::clone(&vector_store),
        embedder,
    );

    (retriever, database, vector_store, dir)
}

async fn index_chunk(
    database: &Database,
    vector_store: &VectorStore,
    path: &str,
    symbol: &str,
    content: &str,
) -> ChunkRecord {
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

    let embedder = HashingProvider::new(DIMENSION);
    let vector = crate::embeddings::EmbeddingProvider::embed(&embedder, content).expect("embed");
    vector_store
        .upsert(EmbeddingRecord::new(chunk.chunk_id.clone(), vector))
        .await
        .expect("vector upsert");

    chunk
}

fn query(text: &str) -> RetrievalQuery {
    RetrievalQuery {
        text: text.to_string(),
        limit: 10,
        min_score: None,
        file_patterns: None,
        languages: None,
        intent: Intent::Explain,
        active_file: None,
        selection: None,
        now_ms: 0,
    }
}

#[tokio::test]
async fn related_content_ranks_above_unrelated() {
    let (retriever, database, vector_store, _dir) = setup().await;

    let related = index_chunk(
        &database,
        &vector_store,
        "src/session.rs",
        "validate_session",
        "fn validate_session(token: &str) -> bool { token.len() > 8 }",
    )
    .await;
    index_chunk(
        &database,
        &vector_store,
        "src/chart.rs",
        "render_chart",
        "fn render_chart(axis: &Axis) { draw_labels(axis); }",
    )
    .await;

    let candidates = retriever
        .retrieve(&query("validate the session token"))
        .await
        .expect("retrieve");

    assert!(!candidates.is_empty());
    assert_eq!(candidates[0].chunk.chunk_id, related.chunk_id);
    for candidate in &candidates {
        assert!(candidate.score >= 0.0 && candidate.score <= 1.0);
        assert_eq!(candidate.method, RetrievalMethod::Semantic);
    }
}

#[tokio::test]
async fn min_score_drops_weak_matches() {
    let (retriever, database, vector_store, _dir) = setup().await;

    index_chunk(
        &database,
        &vector_store,
        "src/chart.rs",
        "render_chart",
        "fn render_chart(axis: &Axis) { draw_labels(axis); }",
    )
    .await;

    let mut strict = query("validate the session token");
    strict.min_score = Some(0.75);

    let candidates = retriever.retrieve(&strict).await.expect("retrieve");
    assert!(
        candidates.is_empty(),
        "unrelated chunk must fall below the floor: {candidates:?}"
    );
}

#[tokio::test]
async fn language_filter_applies_post_hoc() {
    let (retriever, database, vector_store, _dir) = setup().await;

    index_chunk(
        &database,
        &vector_store,
        "src/session.rs",
        "validate_session",
        "fn validate_session(token: &str) -> bool { token.len() > 8 }",
    )
    .await;

    let mut filtered = query("validate the session token");
    filtered.languages = Some(vec!["python".to_string()]);

    let candidates = retriever.retrieve(&filtered).await.expect("retrieve");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn empty_store_returns_no_candidates() {
    let (retriever, _database, _vector_store, _dir) = setup().await;

    let candidates = retriever
        .retrieve(&query("anything at all"))
        .await
        .expect("retrieve");
    assert!(candidates.is_empty());
}
