//! Renders the engine's event stream as log lines and metrics.
//!
//! Rounds, retries and failures are already logged by the engine's own spans;
//! this consumer adds periodic progress and feeds the metric counters.

use refcode::{Event, Outcome};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::telemetry;

/// Completions between two progress lines.
const PROGRESS_EVERY: usize = 1000;

/// Runs until every sender is dropped.
pub async fn consume(mut rx: UnboundedReceiver<Event>) {
    let mut progress = Progress::default();
    while let Some(event) = rx.recv().await {
        progress.observe(&event);
    }
}

#[derive(Default)]
struct Progress {
    targets: usize,
    completed: usize,
    failed: usize,
}

impl Progress {
    fn observe(&mut self, event: &Event) {
        match event {
            Event::RoundStarted { targets, .. } => {
                self.targets = *targets;
                self.completed = 0;
                self.failed = 0;
            }
            Event::Collision { entity, candidate } => {
                tracing::debug!(entity, %candidate, "Code collision");
                telemetry::increment_code_collisions();
            }
            Event::Retrying { .. } => telemetry::increment_assign_retries(),
            Event::Completed { round, entity, outcome } => {
                self.completed += 1;
                match outcome {
                    Outcome::Failed(failure) => {
                        self.failed += 1;
                        telemetry::increment_assign_failures(failure.stage.as_str());
                    }
                    Outcome::Assigned { .. }
                    | Outcome::Propagated { .. }
                    | Outcome::Mismatched { .. } => {
                        telemetry::increment_codes_assigned(*round);
                    }
                    Outcome::AlreadyComplete { .. } | Outcome::Diverged { .. } => {}
                }
                match outcome {
                    Outcome::Mismatched { primary, secondary } => {
                        tracing::warn!(
                            entity,
                            %primary,
                            %secondary,
                            "Referral code differs from the assigned code"
                        );
                    }
                    Outcome::Diverged { primary, secondary } => {
                        tracing::warn!(
                            entity,
                            %primary,
                            %secondary,
                            "Referral code differs from the existing code"
                        );
                    }
                    _ => {}
                }
                if self.completed % PROGRESS_EVERY == 0 {
                    tracing::info!(
                        round,
                        completed = self.completed,
                        targets = self.targets,
                        failed = self.failed,
                        "Progress"
                    );
                }
            }
            Event::RoundFinished { elapsed, .. } => {
                telemetry::record_round_duration(elapsed.as_secs_f64() * 1000.0);
            }
        }
    }
}
