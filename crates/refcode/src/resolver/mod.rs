//! Enumerates the entities a batch works on.
//!
//! Both stores may live on different servers, so nothing here joins across
//! them in SQL. Straggler resolution reads the bridge pairs from the primary
//! store and the keys still missing a code from the secondary store, then
//! intersects the two in memory.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    Result,
    pool::ConnectionPool,
    store::{Connection, Connector, Query, Row, Schema},
    task::Target,
};

/// Lists target entities using short-lived checkouts from the task pools.
pub struct Resolver<A: Connector, B: Connector> {
    primary: Arc<ConnectionPool<A>>,
    secondary: Arc<ConnectionPool<B>>,
    schema: Schema,
}

impl<A: Connector, B: Connector> Resolver<A, B> {
    pub const fn new(
        primary: Arc<ConnectionPool<A>>,
        secondary: Arc<ConnectionPool<B>>,
        schema: Schema,
    ) -> Self {
        Self {
            primary,
            secondary,
            schema,
        }
    }

    /// Every primary entity with at least one bridge reference, whatever its
    /// code state, in primary id order. An entity with several bridge rows is
    /// listed once, with the lowest bridge id.
    ///
    /// # Errors
    /// Any store or pool error from the read.
    pub async fn all_bridged(&self) -> Result<Vec<Target>> {
        let pairs = bridged_pairs(&self.primary, &self.schema).await?;
        let mut seen = HashSet::with_capacity(pairs.len());
        Ok(pairs
            .into_iter()
            .filter(|&(entity, _)| seen.insert(entity))
            .map(|(entity, bridge)| Target::bridged(entity, bridge))
            .collect())
    }

    /// Primary entities whose bridged secondary record exists but still has a
    /// NULL or empty code. Entities are listed once, in primary id order.
    ///
    /// # Errors
    /// Any store or pool error from either read.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn missing_referral(&self) -> Result<Vec<Target>> {
        let pairs = bridged_pairs(&self.primary, &self.schema).await?;

        let rows = read(&self.secondary, &self.schema.missing_secondary_codes()).await?;
        let missing = rows
            .iter()
            .map(|row| row.int(0))
            .collect::<Result<HashSet<i64>>>()?;

        let mut seen = HashSet::new();
        let stragglers: Vec<Target> = pairs
            .into_iter()
            .filter(|(_, bridge)| missing.contains(bridge))
            .filter(|&(entity, _)| seen.insert(entity))
            .map(|(entity, bridge)| Target::bridged(entity, bridge))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            missing = missing.len(),
            stragglers = stragglers.len(),
            "Resolved stragglers"
        );

        Ok(stragglers)
    }
}

async fn bridged_pairs<A: Connector>(
    pool: &Arc<ConnectionPool<A>>,
    schema: &Schema,
) -> Result<Vec<(i64, i64)>> {
    read(pool, &schema.bridged_pairs())
        .await?
        .iter()
        .map(|row| Ok((row.int(0)?, row.int(1)?)))
        .collect()
}

async fn read<C: Connector>(pool: &Arc<ConnectionPool<C>>, query: &Query<'_>) -> Result<Vec<Row>> {
    let mut conn = pool.acquire().await?;
    let res = conn.execute_read(query).await;
    if matches!(&res, Err(e) if e.is_transient()) {
        conn.discard();
    }
    res
}
