//! Population-level convergence.
//!
//! An [`Orchestrator`] runs the initial round over every bridged entity, then
//! up to [`BatchConfig::max_rounds`] straggler rounds over the entities whose
//! secondary record still lacks a code. Tasks run on a fixed-width
//! [`WorkerPool`](manager::WorkerPool); completions come back in arbitrary
//! order and are aggregated by entity id.
//!
//! Task failures never abort the batch. Only resolution errors (the reads
//! that list targets) end [`Orchestrator::run`] with an error.

mod manager;
mod summary;
mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use summary::{Summary, Tally};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    Error, Result,
    event::{Event, Round},
    rand::{RandSource, ThreadRandom},
    resolver::Resolver,
    store::Connector,
    task::{Assigner, Failure, Outcome, Target},
};
use manager::WorkerPool;
use worker::{Completion, WorkRequest};

/// Secondary key used for the initial round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeedBridge {
    /// Assume the secondary key equals the primary id.
    #[default]
    PrimaryId,
    /// Use the bridge id found by the resolver.
    Resolved,
}

/// Shape of an orchestrated batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of concurrent workers. At least 1.
    pub workers: usize,
    /// Straggler rounds after the initial round.
    pub max_rounds: Round,
    pub seed_bridge: SeedBridge,
}

impl BatchConfig {
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `workers` is zero.
    pub fn new(workers: usize, max_rounds: Round, seed_bridge: SeedBridge) -> Result<Self> {
        if workers == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }
        Ok(Self {
            workers,
            max_rounds,
            seed_bridge,
        })
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            max_rounds: 3,
            seed_bridge: SeedBridge::PrimaryId,
        }
    }
}

/// Drives an [`Assigner`] over the whole population.
pub struct Orchestrator<A, B, R = ThreadRandom>
where
    A: Connector,
    B: Connector,
    R: RandSource<u64>,
{
    assigner: Arc<Assigner<A, B, R>>,
    resolver: Resolver<A, B>,
    config: BatchConfig,
    cancel: CancellationToken,
}

impl<A, B, R> Orchestrator<A, B, R>
where
    A: Connector,
    B: Connector,
    R: RandSource<u64> + Send + Sync + 'static,
{
    /// The resolver shares the assigner's pools and schema.
    pub fn new(assigner: Assigner<A, B, R>, config: BatchConfig) -> Self {
        let resolver = Resolver::new(
            Arc::clone(assigner.primary_pool()),
            Arc::clone(assigner.secondary_pool()),
            assigner.schema().clone(),
        );
        Self {
            assigner: Arc::new(assigner),
            resolver,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the token that stops dispatching.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancelling this token stops dispatching new tasks. Tasks already handed
    /// to a worker run to their terminal outcome and the batch still produces
    /// a [`Summary`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub const fn assigner(&self) -> &Arc<Assigner<A, B, R>> {
        &self.assigner
    }

    /// Runs the initial round and the straggler rounds.
    ///
    /// Must be called within a Tokio runtime; the workers are spawned on it.
    ///
    /// # Errors
    /// Any error from resolving targets. Task failures are reported in the
    /// [`Summary`] instead.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip_all, fields(workers = self.config.workers))
    )]
    pub async fn run(&self) -> Result<Summary> {
        let seeds = self.resolver.all_bridged().await?;
        let mut targets: Vec<Target> = match self.config.seed_bridge {
            SeedBridge::PrimaryId => seeds.iter().map(|t| Target::seed(t.entity)).collect(),
            SeedBridge::Resolved => seeds,
        };

        let workers = WorkerPool::spawn(self.config.workers, &self.assigner);
        let mut ledger = Ledger::default();
        let mut round: Round = 0;

        let res = loop {
            let started = Instant::now();
            let counts = self.run_round(&workers, round, &targets, &mut ledger).await;
            let (succeeded, failed) = match counts {
                Ok(counts) => counts,
                Err(e) => break Err(e),
            };

            let stragglers = match self.resolver.missing_referral().await {
                Ok(stragglers) => stragglers,
                Err(e) => break Err(e),
            };

            #[cfg(feature = "tracing")]
            tracing::info!(
                round,
                succeeded,
                failed,
                remaining = stragglers.len(),
                "Round finished"
            );
            self.assigner.events().emit(Event::RoundFinished {
                round,
                succeeded,
                failed,
                remaining: stragglers.len(),
                elapsed: started.elapsed(),
            });

            let cancelled = self.cancel.is_cancelled();
            if stragglers.is_empty() || round >= self.config.max_rounds || cancelled {
                break Ok(ledger.summary(round + 1, stragglers.len(), cancelled));
            }
            round += 1;
            targets = stragglers;
        };

        workers.shutdown().await;
        res
    }

    /// Dispatches one task per target and collects every completion.
    ///
    /// Dispatch and collection run concurrently, so a full completion channel
    /// never blocks a worker that the dispatcher is waiting on.
    async fn run_round(
        &self,
        workers: &WorkerPool,
        round: Round,
        targets: &[Target],
        ledger: &mut Ledger,
    ) -> Result<(usize, usize)> {
        ledger.target(targets);

        #[cfg(feature = "tracing")]
        tracing::info!(round, targets = targets.len(), "Round started");
        self.assigner.events().emit(Event::RoundStarted {
            round,
            targets: targets.len(),
        });

        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(workers.width());

        let dispatch = async move {
            for &target in targets {
                let request = WorkRequest::Assign {
                    round,
                    target,
                    done: done_tx.clone(),
                };
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(round, "Cancelled, no further tasks are dispatched");
                        break;
                    }
                    sent = workers.send_to_next_worker(request) => sent?,
                }
            }
            // Dropping the last sender lets the collector finish once every
            // dispatched task has reported.
            drop(done_tx);
            Ok::<(), Error>(())
        };

        let collect = async {
            let (mut succeeded, mut failed) = (0, 0);
            while let Some(completion) = done_rx.recv().await {
                if completion.outcome.is_success() {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
                ledger.record(completion);
            }
            (succeeded, failed)
        };

        let (dispatched, counts) = tokio::join!(dispatch, collect);
        dispatched?;
        Ok(counts)
    }
}

/// Per-entity bookkeeping across rounds.
#[derive(Default)]
struct Ledger {
    targeted: HashSet<i64>,
    succeeded: HashSet<i64>,
    /// Latest failure of every entity that has not succeeded yet.
    failures: HashMap<i64, Failure>,
    tally: Tally,
}

impl Ledger {
    fn target(&mut self, targets: &[Target]) {
        self.targeted.extend(targets.iter().map(|t| t.entity));
    }

    fn record(&mut self, Completion { target, outcome }: Completion) {
        let entity = target.entity;
        match outcome {
            Outcome::Failed(failure) => {
                if !self.succeeded.contains(&entity) {
                    self.failures.insert(entity, failure);
                }
                return;
            }
            Outcome::Assigned { .. } => self.tally.assigned += 1,
            Outcome::Propagated { .. } => self.tally.propagated += 1,
            Outcome::AlreadyComplete { .. } => self.tally.already_complete += 1,
            Outcome::Mismatched { .. } => self.tally.mismatched += 1,
            Outcome::Diverged { .. } => self.tally.diverged += 1,
        }
        self.failures.remove(&entity);
        self.succeeded.insert(entity);
    }

    fn summary(&self, rounds: Round, unresolved: usize, cancelled: bool) -> Summary {
        let mut tally = self.tally;
        for failure in self.failures.values() {
            if failure.exhausted() {
                tally.exhausted += 1;
            } else {
                tally.non_transient += 1;
            }
            if failure.partial() {
                tally.partial += 1;
            }
        }
        tally.not_attempted = self.targeted.len() - self.succeeded.len() - self.failures.len();

        Summary {
            targeted: self.targeted.len(),
            succeeded: self.succeeded.len(),
            failed: self.targeted.len() - self.succeeded.len(),
            tally,
            rounds,
            unresolved,
            cancelled,
        }
    }
}
