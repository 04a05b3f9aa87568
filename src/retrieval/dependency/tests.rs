use super::*;
use crate::database::sqlite::{DepEdge, DepKind, SymbolType};
use tempfile::TempDir;

async fn setup() -> (DependencyRetriever, Database, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("database");
    let retriever = DependencyRetriever::new(database.clone());
    (retriever, database, dir)
}

async fn index_symbol(
    database: &Database,
    path: &str,
    symbol: &str,
    calls: &[&str],
) -> ChunkRecord {
    let content = format!("fn {symbol}() {{ /* calls {calls:?} */ }}");
    let chunk = ChunkRecord::new(
        path,
        Some((1, 5)),
        "rust",
        Some(symbol.to_string()),
        Some(SymbolType::Function),
        0,
        content,
    );
    ChunkQueries::upsert(database.pool(), &chunk)
        .await
        .expect("upsert");

    let edges: Vec<DepEdge> = calls
        .iter()
        .map(|callee| DepEdge {
            src_chunk_id: chunk.chunk_id.clone(),
            dst_symbol_name: (*callee).to_string(),
            kind: DepKind::Call,
        })
        .collect();
    DepQueries::insert_all(database.pool(), &edges)
        .await
        .expect("edges");

    chunk
}

fn query(text: &str, intent: Intent) -> RetrievalQuery {
    RetrievalQuery {
        text: text.to_string(),
        limit: 20,
        min_score: None,
        file_patterns: None,
        languages: None,
        intent,
        active_file: None,
        selection: None,
        now_ms: 0,
    }
}

#[tokio::test]
async fn walks_call_graph_with_depth_decay() {
    let (retriever, database, _dir) = setup().await;

    // validate_session -> hash_token -> hex_digest
    index_symbol(&database, "src/a.rs", "validate_session", &["hash_token"]).await;
    index_symbol(&database, "src/b.rs", "hash_token", &["hex_digest"]).await;
    index_symbol(&database, "src/c.rs", "hex_digest", &[]).await;

    let candidates = retriever
        .retrieve(&query("why does validate_session reject tokens", Intent::Explain))
        .await
        .expect("retrieve");

    assert_eq!(candidates.len(), 3);

    let by_symbol: Vec<(&str, u32, f64)> = candidates
        .iter()
        .map(|c| {
            (
                c.chunk.symbol_name.as_deref().unwrap_or(""),
                c.dep_depth.expect("dep depth set"),
                c.score,
            )
        })
        .collect();

    assert_eq!(by_symbol[0], ("validate_session", 0, 1.0));
    assert_eq!(by_symbol[1].0, "hash_token");
    assert_eq!(by_symbol[1].1, 1);
    assert!((by_symbol[1].2 - 0.7).abs() < 1e-9);
    assert_eq!(by_symbol[2].0, "hex_digest");
    assert!((by_symbol[2].2 - 0.49).abs() < 1e-9);
}

#[tokio::test]
async fn reverse_edges_only_for_refactor_and_bug_fix() {
    let (retriever, database, _dir) = setup().await;

    // api_handler calls validate_session; the query names the callee.
    index_symbol(&database, "src/api.rs", "api_handler", &["validate_session"]).await;
    index_symbol(&database, "src/auth.rs", "validate_session", &[]).await;

    let explain = retriever
        .retrieve(&query("explain validate_session", Intent::Explain))
        .await
        .expect("retrieve");
    let explain_symbols: Vec<&str> = explain
        .iter()
        .filter_map(|c| c.chunk.symbol_name.as_deref())
        .collect();
    assert!(!explain_symbols.contains(&"api_handler"));

    let refactor = retriever
        .retrieve(&query("refactor validate_session", Intent::Refactor))
        .await
        .expect("retrieve");
    let refactor_symbols: Vec<&str> = refactor
        .iter()
        .filter_map(|c| c.chunk.symbol_name.as_deref())
        .collect();
    assert!(refactor_symbols.contains(&"api_handler"));
}

#[tokio::test]
async fn shallowest_depth_wins_on_revisit() {
    let (retriever, database, _dir) = setup().await;

    // Both the seed and its callee point at shared_util.
    index_symbol(
        &database,
        "src/a.rs",
        "entry_point",
        &["helper_fn", "shared_util"],
    )
    .await;
    index_symbol(&database, "src/b.rs", "helper_fn", &["shared_util"]).await;
    index_symbol(&database, "src/c.rs", "shared_util", &[]).await;

    let candidates = retriever
        .retrieve(&query("trace entry_point", Intent::Explain))
        .await
        .expect("retrieve");

    let shared = candidates
        .iter()
        .find(|c| c.chunk.symbol_name.as_deref() == Some("shared_util"))
        .expect("shared_util retrieved");
    assert_eq!(shared.dep_depth, Some(1), "kept at the shallowest depth");
}

#[tokio::test]
async fn stopword_only_query_returns_empty() {
    let (retriever, database, _dir) = setup().await;
    index_symbol(&database, "src/a.rs", "alpha", &[]).await;

    let candidates = retriever
        .retrieve(&query("why is the code slow", Intent::Explain))
        .await
        .expect("retrieve");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn active_file_seeds_the_walk() {
    let (retriever, database, _dir) = setup().await;

    index_symbol(&database, "src/auth.rs", "validate_session", &["hash_token"]).await;
    index_symbol(&database, "src/hash.rs", "hash_token", &[]).await;

    let mut q = query("tidy this up", Intent::Explain);
    q.active_file = Some("src/auth.rs".to_string());

    let candidates = retriever.retrieve(&q).await.expect("retrieve");
    let symbols: Vec<&str> = candidates
        .iter()
        .filter_map(|c| c.chunk.symbol_name.as_deref())
        .collect();

    assert!(symbols.contains(&"validate_session"));
    assert!(symbols.contains(&"hash_token"));
}

#[test]
fn symbol_extraction_keeps_identifier_shapes_only() {
    let symbols = extract_symbols("why does validateSession drop the auth_token on retry?");
    assert_eq!(symbols, vec!["validateSession", "auth_token"]);

    assert!(extract_symbols("why is the code slow").is_empty());
    assert!(extract_symbols("AssertionError in tests").is_empty());
}
