//! Fixed-size worker pool draining the bounded work queue.

use std::path::PathBuf;
use std::sync::Arc;

use mpipe_models::FileEvent;
use mpipe_storage::BlobConnector;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::logging::FileContext;
use crate::processor::FileProcessor;

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was closed and empty
    Drained,
    /// Cancellation observed between files
    Cancelled,
    /// Could not open its blob store connection
    ConnectFailed,
    /// The worker task panicked
    Panicked,
}

/// Handles of the spawned workers.
pub struct WorkerPool {
    workers: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerPool {
    /// Spawn `config.pool_strength` workers sharing `receiver`.
    ///
    /// Each worker opens its own blob store connection before taking work.
    pub fn spawn(
        config: &WorkerConfig,
        processor: FileProcessor,
        connector: Arc<dyn BlobConnector>,
        receiver: mpsc::Receiver<FileEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.pool_strength)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    config.scratch_dir(id),
                    processor.clone(),
                    Arc::clone(&connector),
                    Arc::clone(&receiver),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(workers = config.pool_strength, "Worker pool started");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit.
    ///
    /// Returns only after the queue's send side is dropped or cancellation
    /// is signalled.
    pub async fn join(self) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(self.workers.len());
        for (id, handle) in self.workers.into_iter().enumerate() {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(e) => {
                    error!(worker_id = id, error = %e, "Worker task failed");
                    WorkerExit::Panicked
                }
            };
            exits.push(exit);
        }
        info!(?exits, "Worker pool stopped");
        exits
    }
}

async fn run_worker(
    id: usize,
    scratch: PathBuf,
    processor: FileProcessor,
    connector: Arc<dyn BlobConnector>,
    receiver: Arc<Mutex<mpsc::Receiver<FileEvent>>>,
    mut cancel: watch::Receiver<bool>,
) -> WorkerExit {
    let blob = match connector.connect().await {
        Ok(blob) => blob,
        Err(e) => {
            error!(worker_id = id, error = %e, "Worker failed to connect to blob store");
            return WorkerExit::ConnectFailed;
        }
    };
    info!(worker_id = id, "Worker started");

    let exit = loop {
        // The receiver lock is only held while waiting for the next event.
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break WorkerExit::Cancelled,
            event = async { receiver.lock().await.recv().await } => event,
        };

        let Some(event) = next else {
            break WorkerExit::Drained;
        };

        let ctx = FileContext::new(id, &event);
        processor.process(blob.as_ref(), &scratch, &ctx, &event).await;
    };

    info!(worker_id = id, exit = ?exit, "Worker stopped");
    exit
}

/// Resolves once cancellation is signalled; never if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
