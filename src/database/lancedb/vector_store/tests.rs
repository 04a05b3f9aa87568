use super::*;
use tempfile::TempDir;

const DIM: usize = 4;

async fn test_store() -> (VectorStore, TempDir) {
    let dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::new(&dir.path().join("vectors"), DIM)
        .await
        .expect("should open vector store");
    (store, dir)
}

fn unit(direction: [f32; DIM]) -> Vec<f32> {
    super::super::normalize_vector(direction.to_vec())
}

#[tokio::test]
async fn upsert_and_search_returns_best_match_first() {
    let (store, _dir) = test_store().await;

    store
        .upsert_batch(vec![
            EmbeddingRecord::new("x-axis", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new("y-axis", vec![0.0, 1.0, 0.0, 0.0]),
            EmbeddingRecord::new("diagonal", vec![1.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .expect("upsert should succeed");

    let hits = store
        .search(&unit([1.0, 0.0, 0.0, 0.0]), 3)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk_id, "x-axis");
    assert!((hits[0].cosine - 1.0).abs() < 1e-4);
    assert!(hits[0].cosine >= hits[1].cosine);
    assert!(hits[1].cosine >= hits[2].cosine);
}

#[tokio::test]
async fn upsert_replaces_existing_vector() {
    let (store, _dir) = test_store().await;

    store
        .upsert(EmbeddingRecord::new("chunk", vec![1.0, 0.0, 0.0, 0.0]))
        .await
        .expect("first upsert");
    store
        .upsert(EmbeddingRecord::new("chunk", vec![0.0, 1.0, 0.0, 0.0]))
        .await
        .expect("second upsert");

    assert_eq!(store.count().await.expect("count"), 1);

    let hits = store
        .search(&unit([0.0, 1.0, 0.0, 0.0]), 1)
        .await
        .expect("search");
    assert_eq!(hits[0].chunk_id, "chunk");
    assert!((hits[0].cosine - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn delete_removes_vector() {
    let (store, _dir) = test_store().await;

    store
        .upsert_batch(vec![
            EmbeddingRecord::new("keep", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new("drop", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .expect("upsert");

    store.delete("drop").await.expect("delete");

    assert_eq!(store.count().await.expect("count"), 1);
    assert_eq!(
        store.list_chunk_ids().await.expect("list"),
        vec!["keep".to_string()]
    );
}

#[tokio::test]
async fn search_is_stable_between_mutations() {
    let (store, _dir) = test_store().await;

    store
        .upsert_batch(vec![
            EmbeddingRecord::new("a", vec![1.0, 0.2, 0.0, 0.0]),
            EmbeddingRecord::new("b", vec![1.0, 0.4, 0.0, 0.0]),
            EmbeddingRecord::new("c", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .expect("upsert");

    let query = unit([1.0, 0.0, 0.0, 0.0]);
    let first = store.search(&query, 3).await.expect("first search");
    let second = store.search(&query, 3).await.expect("second search");

    assert_eq!(first, second);
}

#[tokio::test]
async fn rejects_mismatched_dimension() {
    let (store, _dir) = test_store().await;

    let result = store
        .upsert(EmbeddingRecord::new("bad", vec![1.0, 0.0]))
        .await;
    assert!(result.is_err());

    let result = store.search(&[1.0, 0.0], 1).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn reset_clears_all_rows() {
    let (store, _dir) = test_store().await;

    store
        .upsert(EmbeddingRecord::new("chunk", vec![1.0, 0.0, 0.0, 0.0]))
        .await
        .expect("upsert");
    store.reset().await.expect("reset");

    assert_eq!(store.count().await.expect("count"), 0);
    assert!(store.validate_integrity().await.expect("integrity"));
}
