//! Structured progress events.
//!
//! The engine never prints. Tasks and the orchestrator publish [`Event`]s on
//! an unbounded channel and leave rendering (log lines, progress bars,
//! metrics) to whoever holds the receiving end. Sending is fire-and-forget: a
//! dropped receiver silently disables reporting.

use core::time::Duration;

use tokio::sync::mpsc;

use crate::{Error, code::Code, task::Outcome};

/// Which pass over the population a round is.
pub type Round = u32;

#[derive(Clone, Debug)]
pub enum Event {
    /// A round resolved its targets and is about to dispatch them.
    RoundStarted { round: Round, targets: usize },
    /// A candidate was already taken; a new one will be generated.
    Collision { entity: i64, candidate: Code },
    /// A transient failure; the task will wait and start over.
    Retrying {
        entity: i64,
        attempt: u32,
        max_attempts: u32,
        cause: Error,
    },
    /// A task reached a terminal outcome.
    Completed {
        round: Round,
        entity: i64,
        outcome: Outcome,
    },
    /// Every dispatched task of the round has completed. `remaining` is the
    /// straggler count resolved right after the round.
    RoundFinished {
        round: Round,
        succeeded: usize,
        failed: usize,
        remaining: usize,
        elapsed: Duration,
    },
}

/// Sending half of the event stream. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSender {
    /// Creates a connected sender/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops every event.
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
