use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{
    event::{Event, Round},
    rand::RandSource,
    store::Connector,
    task::{Assigner, Outcome, Target},
};

/// A message sent to a batch worker.
#[derive(Debug)]
pub(crate) enum WorkRequest {
    /// Run one assignment task and report it on `done`.
    Assign {
        round: Round,
        target: Target,
        done: mpsc::Sender<Completion>,
    },
    /// Stop after acknowledging on `response`.
    Shutdown { response: oneshot::Sender<()> },
}

/// A finished task, reported back to the orchestrator.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) target: Target,
    pub(crate) outcome: Outcome,
}

/// Worker task that runs [`WorkRequest::Assign`] requests one at a time.
///
/// All workers share one [`Assigner`], and through it the two connection
/// pools. The loop ends on [`WorkRequest::Shutdown`] or when the request
/// channel closes.
pub(crate) async fn worker_loop<A, B, R>(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    assigner: Arc<Assigner<A, B, R>>,
) where
    A: Connector,
    B: Connector,
    R: RandSource<u64> + Send + Sync + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Assign { round, target, done } => {
                let outcome = assigner.assign(target).await;

                assigner.events().emit(Event::Completed {
                    round,
                    entity: target.entity,
                    outcome: outcome.clone(),
                });

                if done.send(Completion { target, outcome }).await.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {worker_id} could not report entity {}", target.entity);
                }
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(not(feature = "tracing"))]
    let _ = worker_id;
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}
