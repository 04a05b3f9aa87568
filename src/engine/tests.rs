use super::*;
use crate::context::packer::TRUNCATION_MARKER;
use crate::embeddings::HashingProvider;
use std::fs;
use tempfile::TempDir;

const DIMENSION: usize = 64;
const ANCHOR_MS: i64 = 1_700_000_000_000;

async fn engine_for(workspace: &TempDir) -> ContextEngine {
    let config = crate::config::EngineConfig::load(workspace.path()).expect("config");
    let engine =
        ContextEngine::with_provider(config, Arc::new(HashingProvider::new(DIMENSION)));
    engine.initialize().await.expect("initialize");
    engine
}

fn write(workspace: &TempDir, rel: &str, content: &str) {
    let path = workspace.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, content).expect("write file");
}

fn request(input: &str, budget: u32) -> QueryRequest {
    let mut request = QueryRequest::new(input, budget);
    request.anchor_ms = Some(ANCHOR_MS);
    request
}

#[tokio::test]
async fn query_before_initialize_is_rejected() {
    let workspace = TempDir::new().expect("temp dir");
    let config = crate::config::EngineConfig::load(workspace.path()).expect("config");
    let engine =
        ContextEngine::with_provider(config, Arc::new(HashingProvider::new(DIMENSION)));

    let result = engine.query(request("anything", 2000)).await;
    assert!(matches!(result, Err(EngineError::NotInitialized)));
}

#[tokio::test]
async fn zero_budget_is_rejected() {
    let workspace = TempDir::new().expect("temp dir");
    let engine = engine_for(&workspace).await;

    let result = engine.query(request("anything", 0)).await;
    assert!(matches!(result, Err(EngineError::InvalidBudget(_))));
}

#[tokio::test]
async fn infeasible_budget_is_rejected() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/lib.rs", "fn seed() {}\n");
    let engine = engine_for(&workspace).await;

    // Fixed costs alone exceed 40 tokens.
    let result = engine.query(request("a reasonably sized input string", 40)).await;
    assert!(matches!(result, Err(EngineError::InvalidBudget(_))));
}

#[tokio::test]
async fn empty_workspace_returns_empty_result() {
    let workspace = TempDir::new().expect("temp dir");
    let engine = engine_for(&workspace).await;

    let result = engine
        .query(request("explain the login flow", 2000))
        .await
        .expect("query");

    assert!(result.items.is_empty());
    assert_eq!(result.tokens_used, 0);
    assert_eq!(result.intent, Intent::Explain);
}

#[tokio::test]
async fn query_returns_relevant_packed_items() {
    let workspace = TempDir::new().expect("temp dir");
    write(
        &workspace,
        "src/session.rs",
        "fn validate_session(token: &str) -> bool {\n    token.len() > 8\n}\n",
    );
    write(
        &workspace,
        "src/chart.rs",
        "fn render_chart(canvas: &mut Canvas) {\n    canvas.clear();\n}\n",
    );
    let engine = engine_for(&workspace).await;

    let result = engine
        .query(request("explain how validate_session works", 2000))
        .await
        .expect("query");

    assert!(!result.items.is_empty());
    assert_eq!(result.intent, Intent::Explain);
    assert_eq!(result.items[0].name, "src/session.rs");
    assert!(result.items[0].content.contains("validate_session"));
    assert!(result.tokens_used > 0);

    let allocation =
        crate::context::budget::allocate(2000, engine.tokenizer().count("explain how validate_session works"), Intent::Explain)
            .expect("allocation");
    assert!(result.tokens_used <= allocation.context);
}

#[tokio::test]
async fn repeated_queries_are_byte_identical() {
    let workspace = TempDir::new().expect("temp dir");
    for i in 0..5 {
        write(
            &workspace,
            &format!("src/module_{i}.rs"),
            &format!("fn handler_{i}(input: &Request) -> Response {{\n    respond(input)\n}}\n"),
        );
    }
    let engine = engine_for(&workspace).await;

    let first = engine
        .query(request("explain the handler flow", 2000))
        .await
        .expect("query");

    for _ in 0..10 {
        let again = engine
            .query(request("explain the handler flow", 2000))
            .await
            .expect("query");
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn concurrent_queries_agree() {
    let workspace = TempDir::new().expect("temp dir");
    for i in 0..10 {
        write(
            &workspace,
            &format!("src/worker_{i}.rs"),
            &format!("fn process_{i}(job: Job) {{\n    job.run();\n}}\n"),
        );
    }
    let engine = Arc::new(engine_for(&workspace).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .query(request("explain the job processing flow", 2000))
                .await
                .expect("query")
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("join"));
    }

    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
}

#[tokio::test]
async fn bug_fix_intent_reports_recent_edits_first() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/login.rs", "fn test_login() {}\n");
    let engine = engine_for(&workspace).await;

    let result = engine
        .query(request("why does test_login fail with AssertionError?", 2000))
        .await
        .expect("query");

    assert_eq!(result.intent, Intent::BugFix);
    assert_eq!(result.retrieval_methods.first(), Some(&RetrievalMethod::RecentEdits));
}

#[tokio::test]
async fn oversize_symbol_is_truncated_to_the_context_budget() {
    let workspace = TempDir::new().expect("temp dir");

    let mut body = String::from("fn enormous_summary_target() {\n");
    for i in 0..2000 {
        body.push_str(&format!("    let accumulated_value_{i} = compute({i});\n"));
    }
    body.push_str("}\n");
    write(&workspace, "src/big.rs", &body);

    let engine = engine_for(&workspace).await;

    let budget = 1200;
    let input = "summarize enormous_summary_target";
    let result = engine.query(request(input, budget)).await.expect("query");

    let allocation = crate::context::budget::allocate(
        budget,
        engine.tokenizer().count(input),
        Intent::Explain,
    )
    .expect("allocation");

    assert_eq!(result.items.len(), 1);
    assert!(result.tokens_used <= allocation.context);
    assert!(result.items[0].content.ends_with(TRUNCATION_MARKER));
}

#[tokio::test]
async fn file_change_notifications_feed_the_index() {
    let workspace = TempDir::new().expect("temp dir");
    let engine = engine_for(&workspace).await;

    write(&workspace, "src/new.rs", "fn appeared_later() {}\n");
    engine
        .on_file_change("src/new.rs", FileChangeKind::Created)
        .await
        .expect("notify");
    engine.flush_index().await.expect("flush");

    let result = engine
        .query(request("explain appeared_later", 2000))
        .await
        .expect("query");
    assert!(!result.items.is_empty());
    assert_eq!(result.items[0].name, "src/new.rs");
}

#[tokio::test]
async fn pre_cancelled_query_returns_cancelled() {
    let workspace = TempDir::new().expect("temp dir");
    let engine = engine_for(&workspace).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut req = request("anything", 2000);
    req.cancel = Some(cancel);

    let result = engine.query(req).await;
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn initialize_and_dispose_are_idempotent() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/lib.rs", "fn stable() {}\n");

    let config = crate::config::EngineConfig::load(workspace.path()).expect("config");
    let engine =
        ContextEngine::with_provider(config, Arc::new(HashingProvider::new(DIMENSION)));

    engine.initialize().await.expect("first initialize");
    engine.initialize().await.expect("second initialize");

    let (stats_before, embeddings_before) = engine.stats().await.expect("stats");

    engine.dispose().await;
    engine.dispose().await;

    engine.initialize().await.expect("re-initialize");
    let (stats_after, embeddings_after) = engine.stats().await.expect("stats");

    assert_eq!(stats_before.chunk_count, stats_after.chunk_count);
    assert_eq!(embeddings_before, embeddings_after);
}

#[tokio::test]
async fn explicit_intent_override_skips_classification() {
    let workspace = TempDir::new().expect("temp dir");
    write(&workspace, "src/lib.rs", "fn subject() {}\n");
    let engine = engine_for(&workspace).await;

    let mut req = request("this text says fix a bug", 2000);
    req.intent = Some(Intent::Refactor);

    let result = engine.query(req).await.expect("query");
    assert_eq!(result.intent, Intent::Refactor);
}
