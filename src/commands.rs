// CLI command implementations

use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::config::EngineConfig;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::embeddings::{EmbeddingProvider, OllamaProvider};
use crate::engine::{ContextEngine, QueryRequest};
use crate::indexer::Indexer;
use crate::indexer::header::IndexHeader;
use crate::indexer::scanner::WorkspaceScanner;

fn load_config(workspace: Option<PathBuf>) -> Result<EngineConfig> {
    let root = match workspace {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    Ok(EngineConfig::load(&root)?)
}

/// Run a full workspace index with progress output.
pub async fn index_workspace(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace)?;
    config.save()?;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OllamaProvider::new(&config.embedding)
            .map_err(|e| crate::EngineError::Config(format!("{e:#}")))?,
    );

    let database = Database::initialize_from_base_dir(&config.base_dir).await?;
    let dimension = embedder.identity().dimension as usize;
    let vector_store = Arc::new(VectorStore::new(&config.vector_database_path(), dimension).await?);
    let scanner = WorkspaceScanner::new(&config.workspace_root, &config.indexing)?;

    let file_count = scanner.scan().len();
    eprintln!(
        "Indexing {} files under {}",
        file_count,
        config.workspace_root.display()
    );

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message("indexing workspace");
    bar.enable_steady_tick(std::time::Duration::from_millis(100));

    let indexer = Indexer::new(
        database.clone(),
        vector_store,
        embedder,
        scanner,
        config.chunking.clone(),
        config.indexing.workers,
    );

    let report = indexer
        .verify_startup(&config.header_path(), config.tokenizer_family)
        .await?;
    bar.finish_and_clear();

    println!(
        "Indexed {} files ({} chunks inserted, {} deleted, {} failures)",
        report.files_indexed,
        report.chunks_inserted,
        report.chunks_deleted,
        report.files_failed
    );
    if report.embedding_failures > 0 {
        println!(
            "{} {} chunks could not be embedded and will be retried on repair",
            style("warning:").yellow(),
            report.embedding_failures
        );
    }

    database.close().await;
    Ok(())
}

/// Run one query and print the packed context.
pub async fn run_query(
    workspace: Option<PathBuf>,
    input: String,
    token_budget: u32,
    active_file: Option<String>,
) -> Result<()> {
    let config = load_config(workspace)?;
    let engine = ContextEngine::new(config)?;
    engine.initialize().await?;

    let mut request = QueryRequest::new(input, token_budget);
    request.active_file = active_file;

    let result = engine.query(request).await?;

    println!(
        "intent: {}  tokens: {}  methods: {}",
        style(result.intent).cyan(),
        result.tokens_used,
        result
            .retrieval_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if result.items.is_empty() {
        println!("(no context found)");
    }

    for (i, item) in result.items.iter().enumerate() {
        if i > 0 {
            println!("\n---\n");
        }
        println!("{} ({})", style(&item.name).green().bold(), item.description);
        println!("{}", item.content);
    }

    engine.dispose().await;
    Ok(())
}

/// Show index status: store counts and header identity.
pub async fn show_status(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace)?;

    match IndexHeader::load(&config.header_path())? {
        Some(header) => {
            println!("schema version:  {}", header.schema_version);
            println!("tokenizer:       {}", header.tokenizer_family);
            println!(
                "embedding model: {} ({}d, version {})",
                header.embedding_identity.model,
                header.embedding_identity.dimension,
                header.embedding_identity.version
            );
        }
        None => {
            println!("{}", style("No index found; run `index` first.").yellow());
            return Ok(());
        }
    }

    let database = Database::initialize_from_base_dir(&config.base_dir).await?;
    let stats = crate::database::sqlite::ChunkQueries::stats(database.pool()).await?;

    println!("indexed files:   {}", stats.file_count);
    println!("chunks:          {}", stats.chunk_count);
    println!("dependency edges: {}", stats.dep_count);

    database.close().await;
    Ok(())
}

/// Print the active configuration as TOML.
pub fn show_config(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace)?;
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| crate::EngineError::Config(e.to_string()))?;

    println!("workspace: {}", config.workspace_root.display());
    println!("base dir:  {}", config.base_dir.display());
    println!("\n{rendered}");
    Ok(())
}
