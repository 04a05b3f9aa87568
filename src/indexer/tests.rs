use super::*;
use crate::config::IndexingConfig;
use crate::database::sqlite::ChunkQueries;
use crate::embeddings::HashingProvider;
use std::fs;
use tempfile::TempDir;

const DIMENSION: usize = 32;

async fn test_indexer() -> (Indexer, TempDir) {
    let workspace = TempDir::new().expect("temp workspace");
    let base_dir = workspace.path().join(".context-engine");

    let database = Database::initialize_from_base_dir(&base_dir)
        .await
        .expect("database should open");
    let vector_store = Arc::new(
        VectorStore::new(&base_dir.join("vectors"), DIMENSION)
            .await
            .expect("vector store should open"),
    );
    let scanner = WorkspaceScanner::new(workspace.path(), &IndexingConfig::default())
        .expect("scanner should build");

    let indexer = Indexer::new(
        database,
        vector_store,
        Arc::new(HashingProvider::new(DIMENSION)),
        scanner,
        ChunkingConfig::default(),
        2,
    );

    (indexer, workspace)
}

fn write(workspace: &TempDir, rel: &str, content: &str) {
    let path = workspace.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, content).expect("write file");
}

#[tokio::test]
async fn full_reindex_populates_both_stores() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/auth.rs", "fn login() {}\n\nfn logout() {}\n");
    write(&workspace, "src/db.rs", "fn connect() {}\n");

    let report = indexer.full_reindex().await.expect("reindex");

    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.files_failed, 0);
    assert_eq!(report.chunks_inserted, 3);

    let stats = ChunkQueries::stats(indexer.database().pool())
        .await
        .expect("stats");
    assert_eq!(stats.chunk_count, 3);
    assert_eq!(
        indexer.vector_store().count().await.expect("count"),
        3,
        "every chunk gets an embedding"
    );
}

#[tokio::test]
async fn reindexing_unchanged_file_writes_nothing() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/auth.rs", "fn login() {}\n");

    indexer.full_reindex().await.expect("reindex");
    let outcome = indexer.index_file("src/auth.rs").await.expect("index_file");

    assert!(outcome.is_noop(), "unchanged content must cause zero writes");
}

#[tokio::test]
async fn incremental_update_applies_minimal_delta() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/mod.rs", "fn alpha() {}\n\nfn beta() {}\n");
    indexer.full_reindex().await.expect("reindex");

    let alpha_before = ChunkQueries::by_symbol(indexer.database().pool(), "alpha")
        .await
        .expect("by_symbol");
    assert_eq!(alpha_before.len(), 1);

    // Replace beta with gamma; alpha's span and content are untouched.
    write(&workspace, "src/mod.rs", "fn alpha() {}\n\nfn gamma() {}\n");
    let outcome = indexer.index_file("src/mod.rs").await.expect("index_file");

    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.deleted, 1);

    let beta = ChunkQueries::by_symbol(indexer.database().pool(), "beta")
        .await
        .expect("by_symbol");
    assert!(beta.is_empty());

    let gamma = ChunkQueries::by_symbol(indexer.database().pool(), "gamma")
        .await
        .expect("by_symbol");
    assert_eq!(gamma.len(), 1);

    let alpha_after = ChunkQueries::by_symbol(indexer.database().pool(), "alpha")
        .await
        .expect("by_symbol");
    assert_eq!(
        alpha_after[0].chunk_id, alpha_before[0].chunk_id,
        "untouched symbol keeps its chunk id"
    );
}

#[tokio::test]
async fn deleting_a_file_removes_all_its_chunks() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/gone.rs", "fn doomed() {}\n");
    indexer.full_reindex().await.expect("reindex");

    fs::remove_file(workspace.path().join("src/gone.rs")).expect("remove");
    let outcome = indexer.index_file("src/gone.rs").await.expect("index_file");

    assert_eq!(outcome.deleted, 1);

    let stats = ChunkQueries::stats(indexer.database().pool())
        .await
        .expect("stats");
    assert_eq!(stats.chunk_count, 0);
    assert_eq!(indexer.vector_store().count().await.expect("count"), 0);
}

#[tokio::test]
async fn startup_with_fresh_header_runs_initial_index() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/lib.rs", "fn seed() {}\n");

    let header_path = workspace.path().join(".context-engine/index.header");
    let report = indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("startup");

    assert_eq!(report.files_indexed, 1);
    assert!(header_path.exists(), "startup writes the header");
}

#[tokio::test]
async fn startup_replays_missed_changes() {
    let (indexer, workspace) = test_indexer().await;
    let header_path = workspace.path().join(".context-engine/index.header");

    write(&workspace, "src/lib.rs", "fn seed() {}\n");
    indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("first startup");

    // A file appears while the engine is offline.
    write(&workspace, "src/new.rs", "fn appeared() {}\n");

    let report = indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("second startup");
    assert_eq!(report.files_indexed, 1);

    let appeared = ChunkQueries::by_symbol(indexer.database().pool(), "appeared")
        .await
        .expect("by_symbol");
    assert_eq!(appeared.len(), 1);
}

#[tokio::test]
async fn startup_rebuilds_on_tokenizer_change() {
    let (indexer, workspace) = test_indexer().await;
    let header_path = workspace.path().join(".context-engine/index.header");

    write(&workspace, "src/lib.rs", "fn seed() {}\n");
    indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("first startup");

    // Changing the tokenizer family invalidates the budget math the
    // index was built with.
    let report = indexer
        .verify_startup(&header_path, ModelFamily::O200k)
        .await
        .expect("second startup");

    assert_eq!(report.files_indexed, 1, "full rebuild re-indexes the file");

    let stats = ChunkQueries::stats(indexer.database().pool())
        .await
        .expect("stats");
    assert_eq!(stats.chunk_count, 1);
}

#[tokio::test]
async fn consistency_validator_repairs_missing_vectors() {
    let (indexer, workspace) = test_indexer().await;
    write(&workspace, "src/lib.rs", "fn seed() {}\n");
    indexer.full_reindex().await.expect("reindex");

    // Sabotage: drop all vectors but keep metadata.
    indexer.vector_store().reset().await.expect("reset");

    let embedder = HashingProvider::new(DIMENSION);
    let validator = consistency::ConsistencyValidator::new(
        indexer.database(),
        indexer.vector_store(),
        &embedder,
    );

    let report = validator.validate().await.expect("validate");
    assert!(!report.is_consistent);
    assert_eq!(report.missing_in_vector_store.len(), 1);

    let repaired = validator.repair().await.expect("repair");
    assert!(repaired.is_consistent);
    assert_eq!(indexer.vector_store().count().await.expect("count"), 1);
}
