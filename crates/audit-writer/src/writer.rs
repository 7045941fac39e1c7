use crate::cache::HandleCache;
use crate::config::AuditLogWriterConfig;
use crate::error::{Error, Result};
use crate::opener::{AppendOpener, FsOpener};
use crate::stats::{StatsSnapshot, WriterStats};
use crate::worker::{self, WorkerState};

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A line waiting to be appended to the file at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Destination file.
    pub path: String,
    /// Line content, without terminator.
    pub line: String,
}

struct RunningWorker {
    shutdown_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    fn is_active(&self) -> bool {
        !self.shutdown_token.is_cancelled() && !self.handle.is_finished()
    }
}

struct Inner<O: AppendOpener> {
    config: AuditLogWriterConfig,
    sender: mpsc::Sender<LogEntry>,
    state: Arc<tokio::sync::Mutex<WorkerState<O>>>,
    stats: Arc<WriterStats>,
    worker: parking_lot::Mutex<Option<RunningWorker>>,
}

/// Hands audit lines off to a background worker that appends them to files.
///
/// Cloning is cheap and every clone feeds the same queue and worker. Producers never
/// block: when the queue is full the line is dropped.
pub struct AuditLogWriter<O: AppendOpener = FsOpener> {
    inner: Arc<Inner<O>>,
}

impl<O: AppendOpener> Clone for AuditLogWriter<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O: AppendOpener> std::fmt::Debug for AuditLogWriter<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogWriter")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<O: AppendOpener> AuditLogWriter<O> {
    /// Creates a new `AuditLogWriter`. The worker is not running until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config fails validation.
    pub fn new(opener: O, config: AuditLogWriterConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let stats = Arc::new(WriterStats::default());
        let cache = HandleCache::new(Arc::new(opener), config.idle_timeout, stats.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                sender,
                state: Arc::new(tokio::sync::Mutex::new(WorkerState { receiver, cache })),
                stats,
                worker: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Queue `line` for `path`, logging instead of failing if it cannot be queued.
    pub fn write(&self, path: impl Into<String>, line: impl Into<String>) {
        if let Err(error) = self.try_write(path, line) {
            error!(%error, "error adding audit entry to queue");
        }
    }

    /// Queue `line` for `path`. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue is at capacity, or [`Error::Enqueue`]
    /// if the queue can no longer accept entries. The entry is dropped in both cases.
    pub fn try_write(&self, path: impl Into<String>, line: impl Into<String>) -> Result<()> {
        let entry = LogEntry {
            path: path.into(),
            line: line.into(),
        };

        match self.inner.sender.try_send(entry) {
            Ok(()) => {
                WriterStats::incr(&self.inner.stats.enqueued);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                WriterStats::incr(&self.inner.stats.dropped);
                Err(Error::QueueFull {
                    capacity: self.inner.config.queue_capacity,
                })
            }
            // Catch-all: the receiver lives in `Inner` as long as this sender does.
            Err(TrySendError::Closed(_)) => {
                WriterStats::incr(&self.inner.stats.dropped);
                Err(Error::Enqueue("queue closed".to_string()))
            }
        }
    }

    /// Start the worker on the current tokio runtime. Does nothing if already running.
    ///
    /// A worker that was stopped picks up from the current head of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside of a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(RunningWorker::is_active) {
            debug!("audit writer already running");
            return Ok(());
        }

        let shutdown_token = CancellationToken::new();
        let state = self.inner.state.clone();
        let stats = self.inner.stats.clone();
        let maintenance_interval = self.inner.config.maintenance_interval();
        let worker_token = shutdown_token.clone();

        let handle = runtime.spawn(async move {
            // Held for the whole run, so a restarted worker waits for the previous one.
            let mut state = state.lock_owned().await;
            info!("audit writer started");

            worker::run(&mut state, worker_token, maintenance_interval, &stats).await;

            info!("audit writer stopped");
        });

        *worker = Some(RunningWorker {
            shutdown_token,
            handle,
        });
        drop(worker);

        Ok(())
    }

    /// Ask the worker to stop. Takes effect the next time it waits for an entry; an
    /// entry already being written is finished first. Queued entries stay queued.
    pub fn stop(&self) {
        if let Some(worker) = self.inner.worker.lock().as_ref() {
            info!("stopping audit writer");
            worker.shutdown_token.cancel();
        }
    }

    /// Stop the worker, wait for it to exit, then close every cached handle.
    pub async fn shutdown(&self) {
        info!("audit writer shutting down...");

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown_token.cancel();
            if let Err(e) = worker.handle.await {
                let error = Error::Unknown(e.to_string());
                error!(%error, "audit writer worker failed");
            }
        }

        let closed = self.inner.state.lock().await.cache.close_all().await;

        info!(closed, "audit writer shutdown complete");
    }

    /// Whether a worker is running and has not been asked to stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(RunningWorker::is_active)
    }

    /// Number of entries waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.config.queue_capacity - self.inner.sender.capacity()
    }

    /// The config this writer was created with.
    #[must_use]
    pub fn config(&self) -> &AuditLogWriterConfig {
        &self.inner.config
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}
