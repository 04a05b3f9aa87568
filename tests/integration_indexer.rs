#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Integration tests for the indexing pipeline
//!
//! These tests drive the real stores end to end: workspace traversal,
//! symbol chunking, embedding, incremental updates through the change
//! queue, startup replay, and cross-store consistency repair. The
//! deterministic hashing provider stands in for a live embedding server.

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use context_engine::config::{EngineConfig, IndexingConfig};
use context_engine::database::lancedb::VectorStore;
use context_engine::database::sqlite::{ChunkQueries, Database};
use context_engine::embeddings::HashingProvider;
use context_engine::indexer::Indexer;
use context_engine::indexer::chunking::ChunkingConfig;
use context_engine::indexer::consistency::ConsistencyValidator;
use context_engine::indexer::scanner::WorkspaceScanner;
use context_engine::tokenizer::ModelFamily;

const DIMENSION: usize = 48;

fn write(workspace: &TempDir, rel: &str, content: &str) {
    let path = workspace.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create dirs");
    }
    fs::write(path, content).expect("should write file");
}

async fn build_indexer(workspace: &TempDir) -> Indexer {
    let config = EngineConfig::load(workspace.path()).expect("config should load");

    let database = Database::initialize_from_base_dir(&config.base_dir)
        .await
        .expect("database should open");
    let vector_store = Arc::new(
        VectorStore::new(&config.vector_database_path(), DIMENSION)
            .await
            .expect("vector store should open"),
    );
    let scanner = WorkspaceScanner::new(workspace.path(), &IndexingConfig::default())
        .expect("scanner should build");

    Indexer::new(
        database,
        vector_store,
        Arc::new(HashingProvider::new(DIMENSION)),
        scanner,
        ChunkingConfig::default(),
        4,
    )
}

#[tokio::test]
async fn full_index_covers_every_included_file() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/auth.rs", "fn login() {}\n\nfn logout() {}\n");
    write(&workspace, "src/db.py", "def connect():\n    pass\n");
    write(&workspace, "README.md", "# project\n");
    write(&workspace, "node_modules/dep/index.js", "module.exports = 1;\n");

    let indexer = build_indexer(&workspace).await;
    let report = indexer.full_reindex().await.expect("reindex");

    assert_eq!(report.files_indexed, 3, "vendored directory is excluded");
    assert_eq!(report.files_failed, 0);

    let stats = ChunkQueries::stats(indexer.database().pool())
        .await
        .expect("stats");
    assert_eq!(stats.file_count, 3);
    assert_eq!(
        indexer.vector_store().count().await.expect("count") as i64,
        stats.chunk_count,
        "metadata and vector stores agree after a clean index"
    );
}

#[tokio::test]
async fn symbol_replacement_keeps_untouched_chunk_ids() {
    let workspace = TempDir::new().expect("temp dir");
    write(
        &workspace,
        "src/pair.rs",
        "fn keep_me() {\n    stable();\n}\n\nfn replace_me() {\n    old();\n}\n",
    );

    let indexer = build_indexer(&workspace).await;
    indexer.full_reindex().await.expect("reindex");

    let keep_before = ChunkQueries::by_symbol(indexer.database().pool(), "keep_me")
        .await
        .expect("by_symbol");
    assert_eq!(keep_before.len(), 1);

    write(
        &workspace,
        "src/pair.rs",
        "fn keep_me() {\n    stable();\n}\n\nfn brand_new() {\n    fresh();\n}\n",
    );
    indexer.index_file("src/pair.rs").await.expect("index_file");

    assert!(
        ChunkQueries::by_symbol(indexer.database().pool(), "replace_me")
            .await
            .expect("by_symbol")
            .is_empty()
    );
    assert_eq!(
        ChunkQueries::by_symbol(indexer.database().pool(), "brand_new")
            .await
            .expect("by_symbol")
            .len(),
        1
    );

    let keep_after = ChunkQueries::by_symbol(indexer.database().pool(), "keep_me")
        .await
        .expect("by_symbol");
    assert_eq!(keep_after[0].chunk_id, keep_before[0].chunk_id);
}

#[tokio::test]
async fn startup_replay_catches_offline_edits() {
    let workspace = TempDir::new().expect("temp dir");
    let config = EngineConfig::load(workspace.path()).expect("config");
    let header_path = config.header_path();

    write(&workspace, "src/one.rs", "fn one() {}\n");
    let indexer = build_indexer(&workspace).await;
    indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("first startup");

    // Simulate edits that happen while the engine is not running.
    write(&workspace, "src/two.rs", "fn two() {}\n");
    fs::remove_file(workspace.path().join("src/one.rs")).expect("remove");

    let report = indexer
        .verify_startup(&header_path, ModelFamily::Cl100k)
        .await
        .expect("second startup");

    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_removed, 1);

    assert!(
        ChunkQueries::by_symbol(indexer.database().pool(), "one")
            .await
            .expect("by_symbol")
            .is_empty()
    );
    assert_eq!(
        ChunkQueries::by_symbol(indexer.database().pool(), "two")
            .await
            .expect("by_symbol")
            .len(),
        1
    );
}

#[tokio::test]
async fn consistency_repair_restores_the_vector_store() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/auth.rs", "fn login() {}\n");
    write(&workspace, "src/db.rs", "fn connect() {}\n");

    let indexer = build_indexer(&workspace).await;
    indexer.full_reindex().await.expect("reindex");

    indexer.vector_store().reset().await.expect("reset");

    let embedder = HashingProvider::new(DIMENSION);
    let validator =
        ConsistencyValidator::new(indexer.database(), indexer.vector_store(), &embedder);

    let before = validator.validate().await.expect("validate");
    assert!(!before.is_consistent);
    assert_eq!(before.missing_in_vector_store.len(), 2);

    let after = validator.repair().await.expect("repair");
    assert!(after.is_consistent);
    assert_eq!(indexer.vector_store().count().await.expect("count"), 2);
}

#[tokio::test]
async fn reembedding_identical_content_is_stable() {
    let provider = HashingProvider::new(DIMENSION);
    let content = "fn stable_target(input: &str) -> usize { input.len() }";

    let first = context_engine::embeddings::EmbeddingProvider::embed(&provider, content)
        .expect("embed");
    let second = context_engine::embeddings::EmbeddingProvider::embed(&provider, content)
        .expect("embed");

    assert_eq!(first, second);
}
