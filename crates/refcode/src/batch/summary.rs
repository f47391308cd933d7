use core::fmt;

use crate::event::Round;

/// Outcome counts for a whole batch.
///
/// The success counters count completions, so an entity repaired in a later
/// round is counted once per round it succeeded in. The failure counters
/// classify each entity that never succeeded by its last failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Tally {
    pub assigned: usize,
    pub propagated: usize,
    pub already_complete: usize,
    /// A fresh primary code next to a different, pre-existing referral code.
    pub mismatched: usize,
    /// Pre-existing codes that differ between the stores.
    pub diverged: usize,
    /// Transient failures that ran out of attempts.
    pub exhausted: usize,
    /// Failures that were not retried.
    pub non_transient: usize,
    /// Failures after the primary write, leaving the secondary without a
    /// code. Overlaps `exhausted` and `non_transient`.
    pub partial: usize,
    /// Targeted entities no task ever completed for.
    pub not_attempted: usize,
}

/// Final report of an orchestrated batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Summary {
    /// Distinct entities targeted across all rounds.
    pub targeted: usize,
    /// Distinct entities with a successful outcome in any round.
    pub succeeded: usize,
    /// `targeted - succeeded`.
    pub failed: usize,
    pub tally: Tally,
    /// Rounds run, the initial round included.
    pub rounds: Round,
    /// Stragglers still missing a referral code after the last round.
    pub unresolved: usize,
    /// Whether dispatching stopped early on cancellation.
    pub cancelled: bool,
}

impl Summary {
    /// Every targeted entity succeeded with matching codes in both stores and
    /// no stragglers remain.
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
            && self.unresolved == 0
            && self.tally.mismatched == 0
            && self.tally.diverged == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.tally;
        writeln!(
            f,
            "targeted {} | succeeded {} | failed {} | rounds {} | unresolved {}",
            self.targeted, self.succeeded, self.failed, self.rounds, self.unresolved
        )?;
        writeln!(
            f,
            "assigned {} | propagated {} | already complete {} | mismatched {} | diverged {}",
            t.assigned, t.propagated, t.already_complete, t.mismatched, t.diverged
        )?;
        write!(
            f,
            "exhausted {} | non-transient {} | partial {} | not attempted {}",
            t.exhausted, t.non_transient, t.partial, t.not_attempted
        )?;
        if self.cancelled {
            write!(f, " | cancelled")?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::task::Stage;

    #[test]
    fn summary_serializes_with_flat_field_names() {
        let summary = Summary {
            targeted: 5,
            succeeded: 3,
            failed: 2,
            tally: Tally {
                assigned: 2,
                already_complete: 1,
                diverged: 1,
                non_transient: 1,
                partial: 1,
                not_attempted: 1,
                ..Tally::default()
            },
            rounds: 2,
            unresolved: 1,
            cancelled: true,
        };

        let value = serde_json::to_value(summary).unwrap();
        assert_eq!(
            value,
            json!({
                "targeted": 5,
                "succeeded": 3,
                "failed": 2,
                "tally": {
                    "assigned": 2,
                    "propagated": 0,
                    "already_complete": 1,
                    "mismatched": 0,
                    "diverged": 1,
                    "exhausted": 0,
                    "non_transient": 1,
                    "partial": 1,
                    "not_attempted": 1,
                },
                "rounds": 2,
                "unresolved": 1,
                "cancelled": true,
            })
        );
    }

    #[test]
    fn stages_serialize_as_snake_case() {
        let stages = [Stage::Acquire, Stage::Check, Stage::WritePrimary, Stage::WriteSecondary];
        for stage in stages {
            assert_eq!(serde_json::to_value(stage).unwrap(), json!(stage.as_str()));
        }
    }
}
