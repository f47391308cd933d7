//! Per-entity assignment protocol.
//!
//! An [`Assigner`] runs one task per [`Target`]:
//!
//! 1. Check out one connection from each pool.
//! 2. Read the primary entity's code. If it already has one, that code is
//!    reused; codes are never regenerated. If the secondary already has a
//!    code as well the task ends there without writing.
//! 3. Otherwise generate candidates until one is unique in both stores, then
//!    write it to the primary with a conditional update and commit. A unique
//!    constraint violation on that write counts as a collision.
//! 4. Write the code to the secondary entity (keyed by bridge id) with a
//!    conditional update and commit.
//!
//! The two commits are independent. If the task dies between them the
//! primary keeps its code, the secondary is still missing one, and a later
//! convergence round propagates the primary's code.
//!
//! Transient connection failures discard the held connections, wait, and
//! restart the task from step 1, up to [`RetryPolicy::max_attempts`]. Any
//! other error fails the entity immediately.

mod outcome;

use core::time::Duration;
use std::sync::Arc;

pub use outcome::{Failure, Outcome, Stage};
use outcome::{StageError, at};

use crate::{
    Error, Result,
    code::Code,
    event::{Event, EventSender},
    generator::CodeGenerator,
    oracle,
    pool::ConnectionPool,
    rand::{RandSource, ThreadRandom},
    store::{Connection, Connector, Query, Schema, StoreKind},
};

/// The entity a task works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    /// Primary entity id.
    pub entity: i64,
    /// Key of the secondary entity. `None` means "same as `entity`".
    pub bridge: Option<i64>,
}

impl Target {
    /// A target whose secondary key is assumed equal to its primary id.
    pub const fn seed(entity: i64) -> Self {
        Self {
            entity,
            bridge: None,
        }
    }

    pub const fn bridged(entity: i64, bridge: i64) -> Self {
        Self {
            entity,
            bridge: Some(bridge),
        }
    }

    /// The key used to find the secondary entity.
    pub const fn bridge_id(&self) -> i64 {
        match self.bridge {
            Some(bridge) => bridge,
            None => self.entity,
        }
    }
}

/// Retry envelope for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per task, including the first. At least 1.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `max_attempts` is zero.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::invalid_config("max attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

/// Runs assignment tasks against a pair of pools.
///
/// Shared by every worker, typically behind an `Arc`.
pub struct Assigner<A, B, R = ThreadRandom>
where
    A: Connector,
    B: Connector,
    R: RandSource<u64>,
{
    primary: Arc<ConnectionPool<A>>,
    secondary: Arc<ConnectionPool<B>>,
    schema: Schema,
    generator: CodeGenerator<R>,
    retry: RetryPolicy,
    collision_limit: Option<u32>,
    events: EventSender,
}

impl<A, B> Assigner<A, B>
where
    A: Connector,
    B: Connector,
{
    /// Creates an assigner with the default retry policy, an unbounded
    /// collision loop, the thread-local RNG, and no event reporting.
    pub fn new(
        primary: Arc<ConnectionPool<A>>,
        secondary: Arc<ConnectionPool<B>>,
        schema: Schema,
    ) -> Self {
        Self {
            primary,
            secondary,
            schema,
            generator: CodeGenerator::random(),
            retry: RetryPolicy::default(),
            collision_limit: None,
            events: EventSender::disabled(),
        }
    }
}

impl<A, B, R> Assigner<A, B, R>
where
    A: Connector,
    B: Connector,
    R: RandSource<u64>,
{
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Caps consecutive collisions per attempt. `None` keeps the loop
    /// unbounded.
    pub fn with_collision_limit(mut self, limit: Option<u32>) -> Self {
        self.collision_limit = limit;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn with_generator<R2: RandSource<u64>>(
        self,
        generator: CodeGenerator<R2>,
    ) -> Assigner<A, B, R2> {
        Assigner {
            primary: self.primary,
            secondary: self.secondary,
            schema: self.schema,
            generator,
            retry: self.retry,
            collision_limit: self.collision_limit,
            events: self.events,
        }
    }

    pub fn primary_pool(&self) -> &Arc<ConnectionPool<A>> {
        &self.primary
    }

    pub fn secondary_pool(&self) -> &Arc<ConnectionPool<B>> {
        &self.secondary
    }

    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    pub const fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub(crate) const fn events(&self) -> &EventSender {
        &self.events
    }

    /// Runs the task for `target` to a terminal outcome. Never panics on store
    /// errors and never returns early without releasing its connections.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip_all,
            fields(entity = target.entity, bridge = target.bridge_id())
        )
    )]
    pub async fn assign(&self, target: Target) -> Outcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(target).await {
                Ok(outcome) => return outcome,
                Err(StageError { stage, cause })
                    if cause.is_transient() && attempt < max_attempts =>
                {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        %stage,
                        %cause,
                        attempt,
                        max_attempts,
                        "Transient failure, retrying"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = stage;

                    self.events.emit(Event::Retrying {
                        entity: target.entity,
                        attempt,
                        max_attempts,
                        cause,
                    });
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(StageError { stage, cause }) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(%stage, %cause, attempt, "Giving up on entity");
                    return Outcome::Failed(Failure {
                        stage,
                        cause,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// One pass through the protocol on freshly acquired connections.
    async fn attempt(&self, target: Target) -> core::result::Result<Outcome, StageError> {
        let mut primary = self.primary.acquire().await.map_err(at(Stage::Acquire))?;
        let mut secondary = self.secondary.acquire().await.map_err(at(Stage::Acquire))?;

        let res = self.run(&mut *primary, &mut *secondary, target).await;

        // A transient error may have left either connection broken.
        if matches!(&res, Err(e) if e.cause.is_transient()) {
            primary.discard();
            secondary.discard();
        }
        res
    }

    async fn run(
        &self,
        primary: &mut A::Connection,
        secondary: &mut B::Connection,
        target: Target,
    ) -> core::result::Result<Outcome, StageError> {
        let entity = target.entity;
        let existing = read_code(primary, &self.schema.select_primary_code(entity))
            .await
            .map_err(at(Stage::Check))?;

        let claimed = match existing {
            None => {
                return Err(StageError {
                    stage: Stage::Check,
                    cause: Error::MissingRecord {
                        store: StoreKind::Primary,
                        id: entity,
                    },
                });
            }
            Some(Some(code)) => {
                if let Some(settled) = self.settle_existing(secondary, &code, target).await? {
                    return Ok(settled);
                }
                Claim::Existing(code)
            }
            Some(None) => self.claim_primary(primary, secondary, entity).await?,
        };

        self.propagate(secondary, claimed, target).await
    }

    /// Generates candidates until one is unique in both stores and sticks on
    /// the primary entity.
    async fn claim_primary(
        &self,
        primary: &mut A::Connection,
        secondary: &mut B::Connection,
        entity: i64,
    ) -> core::result::Result<Claim, StageError> {
        let mut collisions = 0u32;
        loop {
            let candidate = self.generator.generate();
            let unique = oracle::is_unique(&candidate, &self.schema, primary, secondary)
                .await
                .map_err(at(Stage::Check))?;

            if unique {
                let update = self.schema.update_primary_code(entity, candidate.as_str());
                match primary.execute_write(&update).await {
                    Ok(0) => return self.reread_primary(primary, entity).await,
                    Ok(_) => {
                        primary.commit().await.map_err(at(Stage::WritePrimary))?;
                        return Ok(Claim::Fresh(candidate));
                    }
                    // Lost the check-then-write race to another writer.
                    Err(Error::Conflict { .. }) => {}
                    Err(e) => return Err(at(Stage::WritePrimary)(e)),
                }
            }

            collisions += 1;
            #[cfg(feature = "tracing")]
            tracing::debug!(%candidate, collisions, "Candidate collided");
            self.events.emit(Event::Collision { entity, candidate });

            if let Some(limit) = self.collision_limit {
                if collisions >= limit {
                    return Err(StageError {
                        stage: Stage::Check,
                        cause: Error::CollisionLimit { limit },
                    });
                }
            }
        }
    }

    /// The conditional update touched nothing: either a concurrent writer set
    /// a code first, or the row disappeared.
    async fn reread_primary(
        &self,
        primary: &mut A::Connection,
        entity: i64,
    ) -> core::result::Result<Claim, StageError> {
        match read_code(primary, &self.schema.select_primary_code(entity))
            .await
            .map_err(at(Stage::WritePrimary))?
        {
            Some(Some(code)) => Ok(Claim::Existing(code)),
            Some(None) => Err(StageError {
                stage: Stage::WritePrimary,
                cause: Error::Query {
                    store: StoreKind::Primary,
                    reason: format!("conditional update of entity {entity} affected no rows"),
                },
            }),
            None => Err(StageError {
                stage: Stage::WritePrimary,
                cause: Error::MissingRecord {
                    store: StoreKind::Primary,
                    id: entity,
                },
            }),
        }
    }

    /// Decides what a primary that already carries `code` still needs. Returns
    /// a terminal outcome when the secondary already holds a code, so no write
    /// is issued. Otherwise the code may only be propagated if no other
    /// secondary entity holds it already.
    async fn settle_existing(
        &self,
        secondary: &mut B::Connection,
        code: &str,
        target: Target,
    ) -> core::result::Result<Option<Outcome>, StageError> {
        let key = target.bridge_id();
        if let Some(Some(current)) = read_code(secondary, &self.schema.select_secondary_code(key))
            .await
            .map_err(at(Stage::Check))?
        {
            if current == code {
                return Ok(Some(Outcome::AlreadyComplete { code: current }));
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(
                primary = %code,
                secondary = %current,
                "Stores hold different codes for the entity"
            );
            return Ok(Some(Outcome::Diverged {
                primary: code.to_string(),
                secondary: current,
            }));
        }

        let rows = secondary
            .execute_read(&self.schema.count_secondary_code(code))
            .await
            .map_err(at(Stage::Check))?;
        let taken = rows
            .first()
            .ok_or_else(|| Error::decode("count query returned no rows"))
            .and_then(|row| row.int(0))
            .map_err(at(Stage::Check))?;
        if taken > 0 {
            return Err(StageError {
                stage: Stage::Check,
                cause: Error::Conflict {
                    store: StoreKind::Secondary,
                    code: code.to_string(),
                },
            });
        }
        Ok(None)
    }

    async fn propagate(
        &self,
        secondary: &mut B::Connection,
        claimed: Claim,
        target: Target,
    ) -> core::result::Result<Outcome, StageError> {
        let key = target.bridge_id();
        let code = claimed.as_str().to_string();

        let affected = secondary
            .execute_write(&self.schema.update_secondary_code(key, &code))
            .await
            .map_err(at(Stage::WriteSecondary))?;

        if affected > 0 {
            secondary.commit().await.map_err(at(Stage::WriteSecondary))?;
            return Ok(match claimed {
                Claim::Fresh(code) => Outcome::Assigned { code },
                Claim::Existing(code) => Outcome::Propagated { code },
            });
        }

        match read_code(secondary, &self.schema.select_secondary_code(key))
            .await
            .map_err(at(Stage::WriteSecondary))?
        {
            None => Err(StageError {
                stage: Stage::WriteSecondary,
                cause: Error::MissingRecord {
                    store: StoreKind::Secondary,
                    id: key,
                },
            }),
            Some(None) => Err(StageError {
                stage: Stage::WriteSecondary,
                cause: Error::Query {
                    store: StoreKind::Secondary,
                    reason: format!("conditional update of key {key} affected no rows"),
                },
            }),
            Some(Some(current)) if current == code => {
                Ok(Outcome::AlreadyComplete { code: current })
            }
            Some(Some(current)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    primary = %code,
                    secondary = %current,
                    "Secondary already had a different code"
                );
                Ok(match claimed {
                    Claim::Fresh(fresh) => Outcome::Mismatched {
                        primary: fresh,
                        secondary: current,
                    },
                    Claim::Existing(existing) => Outcome::Diverged {
                        primary: existing,
                        secondary: current,
                    },
                })
            }
        }
    }
}

/// The code a task settled on for the primary entity.
enum Claim {
    /// Generated and written by this task.
    Fresh(Code),
    /// Already on the primary entity.
    Existing(String),
}

impl Claim {
    fn as_str(&self) -> &str {
        match self {
            Self::Fresh(code) => code.as_str(),
            Self::Existing(code) => code,
        }
    }
}

/// Reads a single code column. `None` if the record does not exist,
/// `Some(None)` if it exists without a code.
async fn read_code<C: Connection>(
    conn: &mut C,
    query: &Query<'_>,
) -> Result<Option<Option<String>>> {
    let rows = conn.execute_read(query).await?;
    match rows.first() {
        None => Ok(None),
        Some(row) => Ok(Some(row.code(0)?.map(str::to_owned))),
    }
}
