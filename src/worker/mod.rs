//! Background tree building.
//!
//! [`TreeBuildWorker::start`] spawns one dedicated OS thread that runs a current-thread tokio
//! runtime. Inside it, a poll task discovers pending sources every `poll_interval` and a
//! process task dequeues jobs, gated by a semaphore of `max_concurrent_builds` permits.
//! Callers on any thread enqueue through [`TreeBuildWorker::queue_job`].

mod job;
mod queue;

pub use queue::Job;

use crate::config::RaptorConfig;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::metrics::{BuildMetrics, MetricsSnapshot};
use crate::store::{SourceStatusStore, TreeStore};
use queue::JobQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors raised while starting the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The processing thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub(crate) struct WorkerShared {
    pub(crate) config: RaptorConfig,
    pub(crate) tree_store: Arc<dyn TreeStore>,
    pub(crate) status_store: Arc<dyn SourceStatusStore>,
    pub(crate) llm: Option<Arc<dyn LlmClient>>,
    pub(crate) embedder: Option<Arc<dyn EmbeddingClient>>,
    pub(crate) queue: JobQueue,
    pub(crate) metrics: BuildMetrics,
    running: AtomicBool,
}

struct RunningWorker {
    shutdown: watch::Sender<bool>,
    done: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

/// Builds trees for queued and pending sources on a dedicated thread.
pub struct TreeBuildWorker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<RunningWorker>>,
}

impl TreeBuildWorker {
    /// Worker without completion or embedding capabilities; jobs fail until both are set.
    pub fn new(
        config: RaptorConfig,
        tree_store: Arc<dyn TreeStore>,
        status_store: Arc<dyn SourceStatusStore>,
    ) -> Self {
        Self::with_capabilities(config, tree_store, status_store, None, None)
    }

    /// Worker with optional completion and embedding capabilities.
    pub fn with_capabilities(
        config: RaptorConfig,
        tree_store: Arc<dyn TreeStore>,
        status_store: Arc<dyn SourceStatusStore>,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                config,
                tree_store,
                status_store,
                llm,
                embedder,
                queue: JobQueue::default(),
                metrics: BuildMetrics::new(),
                running: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the processing thread. Starting a running worker is a no-op.
    pub fn start(&self) -> Result<(), WorkerError> {
        let Ok(mut handle) = self.handle.lock() else {
            tracing::error!("Worker handle lock poisoned");
            return Ok(());
        };
        if handle.is_some() {
            tracing::debug!("Tree build worker already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::SeqCst);

        let spawned = std::thread::Builder::new()
            .name("raptor-tree-worker".into())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(run(Arc::clone(&shared), shutdown_rx)),
                    Err(error) => tracing::error!(%error, "Failed to build worker runtime"),
                }
                shared.running.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(error.into());
            }
        };

        *handle = Some(RunningWorker {
            shutdown: shutdown_tx,
            done: done_rx,
            thread,
        });
        tracing::info!(
            max_concurrent_builds = self.shared.config.worker.max_concurrent_builds,
            poll_interval_secs = self.shared.config.worker.poll_interval_secs,
            "Tree build worker started"
        );
        Ok(())
    }

    /// Signal shutdown, let in-flight builds finish, and join the thread.
    ///
    /// Returns whether the thread was joined within `shutdown_timeout`; a worker that was
    /// never started counts as joined.
    pub fn stop(&self) -> bool {
        let running = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => None,
        };
        let Some(running) = running else {
            return true;
        };

        let _ = running.shutdown.send(true);
        let timeout = self.shared.config.worker.shutdown_timeout();
        match running.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let joined = running.thread.join().is_ok();
                tracing::info!(joined, "Tree build worker stopped");
                joined
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Tree build worker did not stop in time"
                );
                false
            }
        }
    }

    /// Enqueue a build; returns `false` when the source is already queued or building.
    ///
    /// Jobs queued while the worker is stopped wait for the next [`TreeBuildWorker::start`].
    pub fn queue_job(&self, job: Job) -> bool {
        let source_id = job.source_id.clone();
        let accepted = self.shared.queue.push(job);
        if accepted {
            tracing::debug!(source_id = %source_id, "Queued tree build job");
        } else {
            tracing::debug!(source_id = %source_id, "Tree build already queued");
        }
        accepted
    }

    /// Jobs waiting to be processed.
    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the processing thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Build counters since construction.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for TreeBuildWorker {
    fn drop(&mut self) {
        if let Ok(handle) = self.handle.lock()
            && let Some(running) = handle.as_ref()
        {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run(shared: Arc<WorkerShared>, shutdown: watch::Receiver<bool>) {
    tokio::join!(
        poll_loop(Arc::clone(&shared), shutdown.clone()),
        process_loop(shared, shutdown),
    );
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn poll_loop(shared: Arc<WorkerShared>, mut shutdown: watch::Receiver<bool>) {
    let config = &shared.config.worker;
    let mut ticker = tokio::time::interval(config.poll_interval().max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        match shared.status_store.list_pending(config.poll_batch_size).await {
            Ok(records) => {
                let mut queued = 0;
                for record in records {
                    if shared.queue.push(Job::from(record)) {
                        queued += 1;
                    }
                }
                if queued > 0 {
                    tracing::info!(queued, "Queued pending sources");
                }
            }
            Err(error) => tracing::warn!(%error, "Failed to poll pending sources"),
        }
    }
    tracing::debug!("Poll loop stopped");
}

async fn process_loop(shared: Arc<WorkerShared>, mut shutdown: watch::Receiver<bool>) {
    let permits = shared.config.worker.max_concurrent_builds.max(1);
    let gate = Arc::new(Semaphore::new(permits));
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(error) = finished {
                tracing::error!(%error, "Tree build task panicked");
            }
        }

        let permit = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            permit = Arc::clone(&gate).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            job = shared.queue.next() => job,
        };

        let shared = Arc::clone(&shared);
        in_flight.spawn(async move {
            let _permit = permit;
            job::process_job(&shared, &job).await;
            shared.queue.finish(&job.source_id);
        });
    }

    let remaining = in_flight.len();
    if remaining > 0 {
        tracing::info!(remaining, "Waiting for in-flight tree builds");
    }
    while let Some(finished) = in_flight.join_next().await {
        if let Err(error) = finished {
            tracing::error!(%error, "Tree build task panicked");
        }
    }
    tracing::debug!("Process loop stopped");
}
