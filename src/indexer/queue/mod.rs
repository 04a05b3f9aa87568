// Change queue for incremental indexing
// Coalesces file-change notifications within a per-file debounce window,
// then hands each file to a bounded worker pool. Work for one file is
// serialized; different files index in parallel.


use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::indexer::Indexer;

/// Kind of filesystem change reported by the editor integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One change notification for a workspace-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub path: String,
    pub kind: FileChangeKind,
}

/// Debounced, worker-pooled consumer of file-change events.
pub struct ChangeQueue {
    tx: mpsc::UnboundedSender<FileChangeEvent>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChangeQueue {
    /// Start the dispatcher task. `debounce` is the per-file coalescing
    /// window; `workers` bounds concurrent per-file index passes.
    #[inline]
    pub fn spawn(indexer: Arc<Indexer>, debounce: Duration, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(dispatcher(
            indexer,
            rx,
            Arc::clone(&pending),
            shutdown.clone(),
            debounce,
            workers.max(1),
        ));

        Self {
            tx,
            pending,
            shutdown,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Enqueue one change notification.
    #[inline]
    pub fn submit(&self, event: FileChangeEvent) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Change queue is shut down; dropping event");
        }
    }

    /// Number of files with work outstanding (debouncing or indexing).
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until all submitted work has been applied to the stores.
    #[inline]
    pub async fn flush(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Flush outstanding work, then stop the dispatcher.
    #[inline]
    pub async fn close(&self) {
        self.flush().await;
        self.shutdown.cancel();

        let handle = self.handle.lock().expect("queue handle lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Change queue dispatcher panicked: {e}");
            }
        }
    }
}

async fn dispatcher(
    indexer: Arc<Indexer>,
    mut rx: mpsc::UnboundedReceiver<FileChangeEvent>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    debounce: Duration,
    workers: usize,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();

    // waiting: paths inside their debounce window.
    // in_flight: paths currently being indexed by a worker.
    // deferred: paths that changed again while in flight.
    let mut waiting: HashMap<String, (FileChangeKind, Instant)> = HashMap::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut deferred: HashMap<String, FileChangeKind> = HashMap::new();

    loop {
        let next_deadline = waiting.values().map(|(_, deadline)| *deadline).min();
        let sleep_until =
            next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        let sleep = tokio::time::sleep_until(sleep_until);
        tokio::pin!(sleep);

        tokio::select! {
            _ = shutdown.cancelled() => break,

            event = rx.recv() => {
                let Some(event) = event else { break };
                let deadline = Instant::now() + debounce;
                if waiting.insert(event.path, (event.kind, deadline)).is_some() {
                    // Coalesced with an event already waiting.
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            }

            done = done_rx.recv() => {
                if let Some(path) = done {
                    in_flight.remove(&path);
                    pending.fetch_sub(1, Ordering::SeqCst);

                    if let Some(kind) = deferred.remove(&path) {
                        let deadline = Instant::now() + debounce;
                        if waiting.insert(path, (kind, deadline)).is_some() {
                            pending.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                }
            }

            _ = &mut sleep, if next_deadline.is_some() => {
                let now = Instant::now();
                let due: Vec<String> = waiting
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();

                for path in due {
                    let Some((kind, _)) = waiting.remove(&path) else {
                        continue;
                    };

                    if in_flight.contains(&path) {
                        // Serialize per-file work: queue behind the
                        // running pass.
                        if deferred.insert(path, kind).is_some() {
                            pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        continue;
                    }

                    in_flight.insert(path.clone());
                    spawn_worker(
                        Arc::clone(&indexer),
                        Arc::clone(&semaphore),
                        done_tx.clone(),
                        path,
                        kind,
                    );
                }
            }
        }
    }

    debug!("Change queue dispatcher stopped");
}

fn spawn_worker(
    indexer: Arc<Indexer>,
    semaphore: Arc<Semaphore>,
    done_tx: mpsc::UnboundedSender<String>,
    path: String,
    kind: FileChangeKind,
) {
    tokio::spawn(async move {
        let _permit = semaphore
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        debug!("Indexing {:?} change for {}", kind, path);

        // index_file resolves the real state on disk, so a stale kind
        // (e.g. Deleted for a recreated file) still converges.
        if let Err(e) = indexer.index_file(&path).await {
            warn!("Failed to index changed file {}: {e:#}", path);
        }

        let _ = done_tx.send(path);
    });
}
