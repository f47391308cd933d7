use core::fmt;

use crate::{Error, code::Code};

/// Where in the assignment protocol a task stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
    /// Checking out connections.
    Acquire,
    /// Reading the current codes or checking candidate uniqueness.
    Check,
    /// Writing the code to the primary entity.
    WritePrimary,
    /// Writing the code to the secondary entity.
    WriteSecondary,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Check => "check",
            Self::WritePrimary => "write_primary",
            Self::WriteSecondary => "write_secondary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task gave up on an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub stage: Stage,
    pub cause: Error,
    /// Attempts made, including the failing one.
    pub attempts: u32,
}

impl Failure {
    /// The failure was transient and the retry budget ran out.
    pub const fn exhausted(&self) -> bool {
        self.cause.is_transient()
    }

    /// The primary entity carries a code but the secondary does not. This is
    /// the state convergence rounds repair.
    pub fn partial(&self) -> bool {
        self.stage == Stage::WriteSecondary
    }
}

/// Terminal result of one assignment task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A fresh code was written to both entities.
    Assigned { code: Code },
    /// The primary already had `code`; it was copied to the secondary.
    Propagated { code: String },
    /// Both entities already carried codes; nothing was written.
    AlreadyComplete { code: String },
    /// A fresh code went to the primary, but the secondary already had a
    /// different referral code, which was left untouched.
    Mismatched { primary: Code, secondary: String },
    /// Both entities already carried codes, and they differ. Nothing was
    /// written.
    Diverged { primary: String, secondary: String },
    Failed(Failure),
}

impl Outcome {
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// The entities ended up with different codes.
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatched { .. } | Self::Diverged { .. })
    }

    /// Whether this task changed any row.
    pub const fn wrote(&self) -> bool {
        matches!(
            self,
            Self::Assigned { .. } | Self::Propagated { .. } | Self::Mismatched { .. }
        )
    }

    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// An error tagged with the stage it happened in.
#[derive(Debug)]
pub(crate) struct StageError {
    pub(crate) stage: Stage,
    pub(crate) cause: Error,
}

/// `map_err` adapter: `.map_err(at(Stage::Check))`.
pub(crate) fn at(stage: Stage) -> impl Fn(Error) -> StageError {
    move |cause| StageError { stage, cause }
}
