//! Opening and closing the two connection pools.

use std::sync::Arc;

use anyhow::Context;
use refcode::{ConnectionPool, Connector, StoreKind};

/// A pair of eagerly opened pools, primary first.
pub type PoolPair<A, B> = (Arc<ConnectionPool<A>>, Arc<ConnectionPool<B>>);

/// Opens both pools up front. If the secondary cannot be opened, the
/// primary's connections are closed before the error is returned.
pub async fn open_pair<A: Connector, B: Connector>(
    primary: A,
    primary_size: usize,
    secondary: B,
    secondary_size: usize,
) -> anyhow::Result<PoolPair<A, B>> {
    let primary = open(StoreKind::Primary, primary, primary_size).await?;
    match open(StoreKind::Secondary, secondary, secondary_size).await {
        Ok(secondary) => Ok((primary, secondary)),
        Err(e) => {
            close(&primary).await;
            Err(e)
        }
    }
}

async fn open<C: Connector>(
    store: StoreKind,
    connector: C,
    size: usize,
) -> anyhow::Result<Arc<ConnectionPool<C>>> {
    let pool = ConnectionPool::open(store, connector, size)
        .await
        .with_context(|| format!("opening {size} connections to the {store}"))?;
    tracing::info!(%store, size, "Connection pool ready");
    Ok(Arc::new(pool))
}

pub async fn close<C: Connector>(pool: &ConnectionPool<C>) {
    if let Err(e) = pool.close_all().await {
        tracing::warn!(%e, "Failed to close {} connections cleanly", pool.store());
    }
}
