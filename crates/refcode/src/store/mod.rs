//! The data store capability consumed by the engine.
//!
//! A backend provides a [`Connector`] that opens [`Connection`]s. The engine
//! only ever talks to a store through a connection checked out of a
//! [`ConnectionPool`](crate::ConnectionPool), and only through the logical
//! queries in [`query`].
//!
//! ## Structure
//!
//! - [`query`] - logical queries, identifiers, schema, and result rows.
//! - [`memory`] - in-memory store with fault injection (feature `memory`).

#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod query;

use core::fmt;
use core::future::Future;

use crate::Result;
pub use query::{
    BridgeTable, Identifier, PrimaryTable, Query, Row, Schema, SecondaryTable, Value, WriteQuery,
};

/// Which of the two stores an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StoreKind {
    /// Store A: primary entities and bridge references.
    Primary,
    /// Store B: secondary entities.
    Secondary,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary store"),
            Self::Secondary => f.write_str("secondary store"),
        }
    }
}

/// Opens connections to one store.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Opens a new connection.
    ///
    /// Transient failures must be reported as
    /// [`Error::Connection`](crate::Error::Connection) so callers can retry.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// A single, exclusively owned connection to one store.
pub trait Connection: Send + 'static {
    /// Runs a read and returns its rows.
    fn execute_read(&mut self, query: &Query<'_>) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Runs a write and returns the number of affected rows.
    fn execute_write(&mut self, query: &WriteQuery<'_>) -> impl Future<Output = Result<u64>> + Send;

    /// Commits any writes issued since the last commit.
    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Closes the connection.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}
