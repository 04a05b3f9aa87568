// Engine façade
// Orchestrates the full pipeline: intent → strategy → retrievers
// (concurrent) → fusion → ranking → budget → packing. Owns the stores
// and the background indexer between initialize() and dispose().

#[cfg(test)]
mod tests;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::packer::ContextItem;
use crate::context::{budget, packer};
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::embeddings::{EmbeddingProvider, OllamaProvider};
use crate::indexer::Indexer;
use crate::indexer::queue::{ChangeQueue, FileChangeEvent, FileChangeKind};
use crate::indexer::scanner::WorkspaceScanner;
use crate::retrieval::{
    Candidate, DependencyRetriever, Intent, IntentClassifier, LexicalRetriever,
    RecentEditsRetriever, RetrievalMethod, RetrievalQuery, Retriever, SemanticRetriever, fusion,
    ranker, strategy,
};
use crate::tokenizer::TokenCounter;
use crate::{EngineError, Result};

/// A context request from the editor integration.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// The user's free-text request.
    pub input: String,
    /// Overrides intent classification when the caller already knows.
    pub intent: Option<Intent>,
    /// Total token budget for the whole prompt.
    pub token_budget: u32,
    /// Workspace-relative path of the file open in the editor.
    pub active_file: Option<String>,
    /// Selected line range inside `active_file`, 1-based inclusive.
    pub selection: Option<(u32, u32)>,
    /// Optional wall-clock deadline for the query.
    pub deadline: Option<Duration>,
    /// External cancellation handle.
    pub cancel: Option<CancellationToken>,
    /// Recency anchor override (milliseconds since the epoch). Tests use
    /// this to make recency math reproducible; production leaves it unset.
    pub anchor_ms: Option<i64>,
}

impl QueryRequest {
    #[inline]
    pub fn new(input: impl Into<String>, token_budget: u32) -> Self {
        Self {
            input: input.into(),
            intent: None,
            token_budget,
            active_file: None,
            selection: None,
            deadline: None,
            cancel: None,
            anchor_ms: None,
        }
    }
}

/// The engine's output: packed items plus how they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextResult {
    /// Packed context items, highest-ranked first.
    pub items: Vec<ContextItem>,
    /// The resolved intent.
    pub intent: Intent,
    /// Tokenizer-measured size of the packed context.
    pub tokens_used: u32,
    /// Methods that ran successfully, in strategy order.
    pub retrieval_methods: Vec<RetrievalMethod>,
}

impl ContextResult {
    fn empty(intent: Intent, retrieval_methods: Vec<RetrievalMethod>) -> Self {
        Self {
            items: Vec::new(),
            intent,
            tokens_used: 0,
            retrieval_methods,
        }
    }
}

struct EngineState {
    database: Database,
    indexer: Arc<Indexer>,
    queue: ChangeQueue,
    retrievers: Vec<Arc<dyn Retriever>>,
}

impl EngineState {
    fn retriever_for(&self, method: RetrievalMethod) -> &Arc<dyn Retriever> {
        &self.retrievers[method.index()]
    }
}

/// The code-aware context engine.
pub struct ContextEngine {
    config: EngineConfig,
    tokenizer: Arc<TokenCounter>,
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<Option<EngineState>>,
}

impl ContextEngine {
    /// Build an engine with the configured Ollama embedding backend.
    #[inline]
    pub fn new(config: EngineConfig) -> Result<Self> {
        let embedder = Arc::new(
            OllamaProvider::new(&config.embedding)
                .map_err(|e| EngineError::Config(format!("{e:#}")))?,
        );
        Ok(Self::with_provider(config, embedder))
    }

    /// Build an engine with an injected embedding provider.
    #[inline]
    pub fn with_provider(config: EngineConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let tokenizer = Arc::new(TokenCounter::new(config.tokenizer_family));

        Self {
            config,
            tokenizer,
            embedder,
            state: RwLock::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn tokenizer(&self) -> &Arc<TokenCounter> {
        &self.tokenizer
    }

    /// Open the stores, verify the index header, replay or rebuild as
    /// needed, and start the change queue. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_some() {
            debug!("Engine already initialized");
            return Ok(());
        }

        info!(
            "Initializing context engine for workspace {}",
            self.config.workspace_root.display()
        );

        let database = Database::initialize_from_base_dir(&self.config.base_dir)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("{e:#}")))?;

        let dimension = self.embedder.identity().dimension as usize;
        let vector_store = Arc::new(
            VectorStore::new(&self.config.vector_database_path(), dimension).await?,
        );

        let scanner = WorkspaceScanner::new(&self.config.workspace_root, &self.config.indexing)
            .map_err(EngineError::Other)?;

        let indexer = Arc::new(Indexer::new(
            database.clone(),
            Arc::clone(&vector_store),
            Arc::clone(&self.embedder),
            scanner,
            self.config.chunking.clone(),
            self.config.indexing.workers,
        ));

        indexer
            .verify_startup(&self.config.header_path(), self.config.tokenizer_family)
            .await
            .map_err(EngineError::Other)?;

        let queue = ChangeQueue::spawn(
            Arc::clone(&indexer),
            Duration::from_millis(self.config.indexing.debounce_ms),
            self.config.indexing.workers,
        );

        let retrievers: Vec<Arc<dyn Retriever>> = vec![
            Arc::new(SemanticRetriever::new(
                database.clone(),
                Arc::clone(&vector_store),
                Arc::clone(&self.embedder),
            )),
            Arc::new(LexicalRetriever::new(database.clone())),
            Arc::new(DependencyRetriever::new(database.clone())),
            Arc::new(RecentEditsRetriever::new(database.clone())),
        ];

        *state = Some(EngineState {
            database,
            indexer,
            queue,
            retrievers,
        });

        info!("Context engine initialized");
        Ok(())
    }

    /// Flush pending index work and close the stores. Idempotent.
    pub async fn dispose(&self) {
        let mut state = self.state.write().await;
        let Some(state) = state.take() else {
            debug!("Engine already disposed");
            return;
        };

        info!("Disposing context engine");
        state.queue.close().await;
        state.database.close().await;
    }

    /// Notification hook for workspace file changes.
    pub async fn on_file_change(&self, path: &str, kind: FileChangeKind) -> Result<()> {
        let state = self.state.read().await;
        let Some(state) = state.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        state.queue.submit(FileChangeEvent {
            path: path.to_string(),
            kind,
        });
        Ok(())
    }

    /// Wait for the change queue to drain. Primarily for tests and the
    /// CLI, which need indexing quiescence before querying.
    pub async fn flush_index(&self) -> Result<()> {
        let state = self.state.read().await;
        let Some(state) = state.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        state.queue.flush().await;
        Ok(())
    }

    /// Run the full retrieval pipeline for one request.
    pub async fn query(&self, request: QueryRequest) -> Result<ContextResult> {
        if request.token_budget == 0 {
            return Err(EngineError::InvalidBudget(
                "token budget must be positive".to_string(),
            ));
        }

        let state = self.state.read().await;
        let Some(state) = state.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        let started = Instant::now();
        let deadline = request.deadline.map(|d| started + d);

        check_cancelled(&request.cancel)?;

        // C6: intent resolution.
        let intent = match request.intent {
            Some(intent) => intent,
            None => {
                let (intent, confidence) = IntentClassifier::classify(&request.input);
                debug!("Classified intent {} ({:.2})", intent, confidence);
                intent
            }
        };

        // C11: budget feasibility is checked before any store I/O; the
        // allocation depends only on the budget and the intent.
        let input_tokens = self.tokenizer.count(&request.input);
        let allocation = budget::allocate(request.token_budget, input_tokens, intent)?;

        // C7: strategy selection.
        let retrieval_strategy = strategy::strategy_for(intent);

        let now_ms = request.anchor_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        let retrieval_query = RetrievalQuery {
            text: request.input.clone(),
            limit: self.config.retrieval.candidate_limit,
            min_score: None,
            file_patterns: None,
            languages: None,
            intent,
            active_file: request.active_file.clone(),
            selection: request.selection,
            now_ms,
        };

        check_cancelled(&request.cancel)?;

        // C8: retrievers run concurrently; a failure isolates to an
        // empty list for that method.
        let futures = retrieval_strategy.methods.iter().map(|method| {
            let retriever = Arc::clone(state.retriever_for(*method));
            let query = retrieval_query.clone();
            let method = *method;
            async move { (method, retriever.retrieve(&query).await) }
        });

        let joined = join_all(futures);
        let bounded = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, joined)
                    .await
                    .map_err(|_| EngineError::DeadlineExceeded),
                None => Ok(joined.await),
            }
        };

        // Cancellation interrupts retrievers at their store-call await
        // points; a cancelled query returns no partial result.
        let outcomes = match &request.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                outcomes = bounded => outcomes?,
            },
            None => bounded.await?,
        };

        let mut lists: Vec<(RetrievalMethod, Vec<Candidate>)> = Vec::new();
        let mut retrieval_methods: Vec<RetrievalMethod> = Vec::new();
        let mut failures = 0usize;

        for (method, outcome) in outcomes {
            match outcome {
                Ok(candidates) => {
                    retrieval_methods.push(method);
                    lists.push((method, candidates));
                }
                Err(e) => {
                    warn!("{} retrieval failed, continuing without it: {e}", method);
                    failures += 1;
                }
            }
        }

        if failures == retrieval_strategy.methods.len() {
            // Both stores are effectively unreachable; serve an empty
            // result and kick off a background rebuild attempt.
            error!("All retrievers failed; index appears unavailable");
            let indexer = Arc::clone(&state.indexer);
            tokio::spawn(async move {
                if let Err(e) = indexer.full_reindex().await {
                    error!("Background index rebuild failed: {e:#}");
                }
            });
            return Ok(ContextResult::empty(intent, retrieval_methods));
        }

        if lists.iter().all(|(_, candidates)| candidates.is_empty()) {
            debug!("No candidates retrieved");
            return Ok(ContextResult::empty(intent, retrieval_methods));
        }

        // C9 + C10: fusion, then intent-aware ranking.
        let fused = fusion::fuse(&lists, &retrieval_strategy);
        let ranked = ranker::rank(fused, intent, now_ms);

        check_cancelled(&request.cancel)?;

        // C12: packing is never interrupted mid-item; the hard budget
        // bound depends on it.
        let packed = packer::pack(&ranked, allocation.context, &self.tokenizer)?;

        debug!(
            "Query produced {} items using {}/{} context tokens in {:?}",
            packed.items.len(),
            packed.tokens_used,
            allocation.context,
            started.elapsed()
        );

        Ok(ContextResult {
            items: packed.items,
            intent,
            tokens_used: packed.tokens_used,
            retrieval_methods,
        })
    }

    /// Store statistics for the status command.
    pub async fn stats(&self) -> Result<(crate::database::sqlite::StoreStats, u64)> {
        let state = self.state.read().await;
        let Some(state) = state.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        let stats = crate::database::sqlite::ChunkQueries::stats(state.database.pool())
            .await
            .map_err(EngineError::Other)?;
        let embeddings = state.indexer.vector_store().count().await?;

        Ok((stats, embeddings))
    }
}

fn check_cancelled(cancel: &Option<CancellationToken>) -> Result<()> {
    if let Some(cancel) = cancel {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
    }
    Ok(())
}
