//! Fixed-width pool of batch workers.
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] of capacity one,
//! so a send completes only once a worker is ready for the next request, and
//! requests are handed out round-robin. Shutdown is explicit and
//! acknowledged per worker.

use core::time::Duration;
use std::sync::Arc;

use portable_atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

use super::worker::{WorkRequest, worker_loop};
use crate::{Error, Result, rand::RandSource, store::Connector, task::Assigner};

/// How long [`WorkerPool::shutdown`] waits for each acknowledgement.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `width` workers on the current runtime, all sharing `assigner`.
    pub(crate) fn spawn<A, B, R>(width: usize, assigner: &Arc<Assigner<A, B, R>>) -> Self
    where
        A: Connector,
        B: Connector,
        R: RandSource<u64> + Send + Sync + 'static,
    {
        let workers = (0..width)
            .map(|worker_id| {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(worker_loop(worker_id, rx, Arc::clone(assigner)));
                tx
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(width, "Spawned batch workers");

        Self {
            workers,
            next_worker: AtomicUsize::new(0),
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.workers.len()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a request to the next worker, waiting until it accepts.
    ///
    /// # Errors
    /// [`Error::WorkerUnavailable`] if that worker has stopped.
    pub(crate) async fn send_to_next_worker(&self, request: WorkRequest) -> Result<()> {
        let worker = self.next_worker_index();
        self.workers[worker]
            .send(request)
            .await
            .map_err(|_| Error::WorkerUnavailable { worker })
    }

    /// Asks every worker to stop and waits (up to 3 seconds per worker) for
    /// the acknowledgements.
    ///
    /// Requests already queued ahead of the shutdown message are processed
    /// first.
    pub(crate) async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying all workers to shut down");

        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                acks.push((i, rx));
            }
        }

        let waits = acks.into_iter().map(|(_i, rx)| async move {
            match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} dropped its acknowledgement: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });
        futures::future::join_all(waits).await;

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool shutdown complete");
    }
}
