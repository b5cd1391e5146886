//! Background thread that runs sync jobs handed over through a channel.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use variant_sync_storage::{SqliteStorage, SyncJobStatus};

use crate::{
    catalog::ExternalCatalog,
    config::EngineConfig,
    dispatch::{DispatchOutcome, JobQueue, SyncJobRequest},
    error::EngineError,
    job::{dispatch_superseded, run_sync_job},
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs_run: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs that could not be run at all (storage errors).
    pub errors: usize,
    /// Follow-up jobs queued for edits committed mid-sync.
    pub redispatched: usize,
}

/// `JobQueue` backed by the worker's channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: Sender<SyncJobRequest>,
}

impl JobQueue for ChannelQueue {
    fn enqueue(&self, request: SyncJobRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .map_err(|_| EngineError::QueueUnavailable("sync worker has stopped".into()))
    }
}

/// Owns the worker thread. Dropping it stops the thread and waits for the
/// job in hand to finish, same as `stop`.
pub struct SyncWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
    queue: ChannelQueue,
}

impl SyncWorker {
    /// Opens a dedicated connection to `config.database_path` and starts the
    /// worker thread.
    pub fn spawn(
        config: &EngineConfig,
        catalog: Arc<dyn ExternalCatalog>,
    ) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(&config.database_path)?;
        let (job_tx, job_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let poll_interval = config.worker_poll_interval();
        let suffix_matching = config.suffix_matching;
        let requeue = ChannelQueue { tx: job_tx.clone() };

        let handle = thread::Builder::new()
            .name("sync-worker".into())
            .spawn(move || {
                run_loop(
                    storage,
                    catalog,
                    job_rx,
                    requeue,
                    stop_rx,
                    poll_interval,
                    suffix_matching,
                )
            })
            .map_err(|e| EngineError::QueueUnavailable(format!("spawning sync worker: {e}")))?;

        tracing::info!(db = %config.database_path.display(), "sync worker started");
        Ok(Self {
            stop_tx,
            handle: Some(handle),
            queue: ChannelQueue { tx: job_tx },
        })
    }

    /// Queue handle to pass to `Engine::new`.
    pub fn queue(&self) -> ChannelQueue {
        self.queue.clone()
    }

    /// Signal the worker and wait for it. Jobs already received are finished first.
    pub fn stop(mut self) -> WorkerStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WorkerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                tracing::error!("sync worker panicked");
                WorkerStats::default()
            }),
            None => WorkerStats::default(),
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn run_loop(
    mut storage: SqliteStorage,
    catalog: Arc<dyn ExternalCatalog>,
    jobs: Receiver<SyncJobRequest>,
    requeue: ChannelQueue,
    stop: Receiver<()>,
    poll_interval: Duration,
    suffix_matching: bool,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let request = match jobs.recv_timeout(poll_interval) {
            Ok(request) => Some(request),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(request) = request {
            stats.jobs_run += 1;
            match run_sync_job(&mut storage, catalog.as_ref(), request, suffix_matching) {
                Ok(SyncJobStatus::Completed) => stats.completed += 1,
                Ok(_) => stats.failed += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(job_id = %request.job_id, error = %e, "sync job could not run");
                }
            }
            match dispatch_superseded(&mut storage, &requeue, request) {
                Ok(Some(DispatchOutcome::Enqueued(_))) => stats.redispatched += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(job_id = %request.job_id, error = %e, "follow-up dispatch failed");
                }
            }
            continue;
        }

        match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }
    }
    tracing::info!(jobs = stats.jobs_run, "sync worker stopped");
    stats
}
