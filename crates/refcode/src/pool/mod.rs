//! Bounded connection pool.
//!
//! A [`ConnectionPool`] owns a fixed number of slots for one store. Each
//! [`acquire`](ConnectionPool::acquire) waits for a free slot, then hands out
//! an idle connection or opens a new one into the slot. The returned
//! [`PooledConnection`] is exclusively owned by the caller and goes back to the
//! pool when it is released or dropped, so every exit path of a task returns
//! its connections.
//!
//! There is no acquisition timeout: a caller holding a connection forever
//! keeps that slot forever.

#[cfg(test)]
mod tests;

use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    Error, Result,
    store::{Connection, Connector, StoreKind},
};

/// A fixed-size pool of connections to one store.
pub struct ConnectionPool<C: Connector> {
    store: StoreKind,
    connector: C,
    size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Connection>>,
    closed: AtomicBool,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates a pool that opens connections on first use.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `size` is zero.
    pub fn lazy(store: StoreKind, connector: C, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_config(format!(
                "{store} pool size must be greater than 0"
            )));
        }
        Ok(Self {
            store,
            connector,
            size,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            closed: AtomicBool::new(false),
            in_use: AtomicUsize::new(0),
            peak_in_use: AtomicUsize::new(0),
        })
    }

    /// Creates a pool and opens all `size` connections up front.
    ///
    /// # Errors
    /// Fails if `size` is zero or any connection cannot be opened.
    pub async fn open(store: StoreKind, connector: C, size: usize) -> Result<Self> {
        let pool = Self::lazy(store, connector, size)?;
        let mut opened = Vec::with_capacity(size);
        for _ in 0..size {
            opened.push(pool.connector.connect().await?);
        }
        *pool.idle.lock() = opened;

        #[cfg(feature = "tracing")]
        tracing::debug!(%store, size, "Opened connection pool");

        Ok(pool)
    }

    pub const fn store(&self) -> StoreKind {
        self.store
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Highest number of connections checked out at the same time.
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::Relaxed)
    }

    /// Connections sitting idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Checks out a connection, waiting until a slot is free.
    ///
    /// # Errors
    /// - [`Error::PoolClosed`] once [`close_all`](Self::close_all) ran.
    /// - Whatever the connector returns if a new connection has to be opened.
    ///   The slot is freed again in that case.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed { store: self.store })?;

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                #[cfg(feature = "tracing")]
                tracing::trace!(store = %self.store, "Opening connection into free slot");
                self.connector.connect().await?
            }
        };

        let in_use = self.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::Relaxed);

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            discard: false,
            _permit: permit,
        })
    }

    /// Returns a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Refuses further acquisitions and closes every idle connection.
    ///
    /// Connections still checked out are closed when their holders release
    /// them.
    ///
    /// # Errors
    /// Returns the first error reported while closing; the remaining
    /// connections are still closed.
    pub async fn close_all(&self) -> Result<()> {
        // Flipped under the idle lock so `give_back` cannot park a connection
        // after the drain.
        let drained = {
            let mut idle = self.idle.lock();
            self.closed.store(true, Ordering::Release);
            core::mem::take(&mut *idle)
        };
        self.permits.close();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            store = %self.store,
            idle = drained.len(),
            in_use = self.in_use(),
            "Closing connection pool"
        );

        let mut first_err = None;
        for conn in drained {
            if let Err(e) = conn.close().await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn give_back(&self, conn: C::Connection, discard: bool) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if discard {
            #[cfg(feature = "tracing")]
            tracing::debug!(store = %self.store, "Discarding connection");
            return;
        }
        let mut idle = self.idle.lock();
        if !self.is_closed() {
            idle.push(conn);
            return;
        }
        drop(idle);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn.close().await;
            });
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dereferences to the underlying connection. Dropping it hands the
/// connection back to the pool and frees the slot.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<ConnectionPool<C>>,
    discard: bool,
    // Dropped after `Drop::drop`, so the connection is back in the idle list
    // before the next waiter is woken.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Returns the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Drops the connection instead of pooling it. The slot opens a fresh
    /// connection on its next acquisition.
    pub fn discard(mut self) {
        self.discard = true;
    }

    pub fn store(&self) -> StoreKind {
        self.pool.store
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, self.discard);
        }
    }
}
