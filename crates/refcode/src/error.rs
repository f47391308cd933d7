//! Error types for the code assignment engine.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a store, pool, or assignment task can report. The only property the engine
//! branches on is [`Error::is_transient`]: transient errors are retried by the
//! assignment task's retry envelope, everything else abandons the entity.
//!
//! ## Error Cases
//! - `Connection`: the driver lost or could not establish a connection.
//! - `Conflict`: a unique constraint rejected a code.
//! - `Query`: any other store-side failure.
//! - `MissingRecord`: the row an update targeted does not exist.
//! - `CollisionLimit`: the configured collision cap was exceeded.
//! - `Decode`: a row came back in an unexpected shape.
//! - `InvalidConfig`: configuration was rejected before any work started.
//! - `PoolClosed`: an acquisition was attempted after `close_all`.
//! - `WorkerUnavailable`: a batch worker stopped before the batch finished.

use crate::store::StoreKind;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the assignment engine.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Lost, broken, or refused connection. Always transient.
    #[error("{store} connection error: {reason}")]
    Connection { store: StoreKind, reason: String },

    /// A unique constraint on the code column rejected the write.
    #[error("{store} rejected duplicate code {code}")]
    Conflict { store: StoreKind, code: String },

    /// Non-transient store failure (syntax, permissions, constraint other
    /// than uniqueness, ...).
    #[error("{store} query error: {reason}")]
    Query { store: StoreKind, reason: String },

    /// The targeted row does not exist.
    #[error("{store} has no record with id {id}")]
    MissingRecord { store: StoreKind, id: i64 },

    /// Too many consecutive collisions for a single entity.
    #[error("gave up after {limit} consecutive code collisions")]
    CollisionLimit { limit: u32 },

    /// A row did not have the expected columns or types.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The pool was closed with `close_all`.
    #[error("{store} connection pool is closed")]
    PoolClosed { store: StoreKind },

    /// A batch worker's channel closed while work was still being dispatched.
    #[error("worker {worker} channel closed")]
    WorkerUnavailable { worker: usize },
}

impl Error {
    /// Returns `true` for connection-layer failures that are expected to
    /// resolve after a short wait.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
