//! Maps `sqlx` errors onto the engine's taxonomy.
//!
//! Only connection-layer failures become [`Error::Connection`], which the
//! assignment task retries. Lock wait timeouts and deadlocks roll back the
//! statement without side effects, so they are retried too.

use refcode::{Error, StoreKind};
use sqlx::error::DatabaseError as _;
use sqlx::mysql::MySqlDatabaseError;

/// MySQL server errors that leave nothing behind and resolve on retry.
const TRANSIENT_SERVER_ERRORS: &[u16] = &[
    1205, // ER_LOCK_WAIT_TIMEOUT
    1213, // ER_LOCK_DEADLOCK
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
];

/// Classifies `err`. `code` is the candidate being written, if any, and is
/// reported in [`Error::Conflict`].
pub(crate) fn classify(store: StoreKind, err: sqlx::Error, code: Option<&str>) -> Error {
    let reason = err.to_string();
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection { store, reason },
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return Error::Conflict {
                    store,
                    code: code.unwrap_or_default().to_string(),
                };
            }
            let transient = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| TRANSIENT_SERVER_ERRORS.contains(&e.number()));
            if transient {
                Error::Connection { store, reason }
            } else {
                Error::Query { store, reason }
            }
        }
        sqlx::Error::Configuration(_) => Error::InvalidConfig { reason },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => Error::Decode { reason },
        _ => Error::Query { store, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failures_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let mapped = classify(StoreKind::Primary, err, None);
        assert!(mapped.is_transient());
        assert!(matches!(mapped, Error::Connection { store: StoreKind::Primary, .. }));
    }

    #[test]
    fn pool_and_protocol_failures_are_transient() {
        for err in [
            sqlx::Error::PoolTimedOut,
            sqlx::Error::Protocol("unexpected packet".into()),
        ] {
            assert!(classify(StoreKind::Secondary, err, None).is_transient());
        }
    }

    #[test]
    fn decode_failures_are_not_retried() {
        let missing = sqlx::Error::ColumnNotFound("referral_code".into());
        let mapped = classify(StoreKind::Secondary, missing, None);
        assert!(matches!(mapped, Error::Decode { .. }));
        assert!(!mapped.is_transient());
    }

    #[test]
    fn row_not_found_is_a_query_error() {
        let mapped = classify(StoreKind::Primary, sqlx::Error::RowNotFound, None);
        assert!(matches!(mapped, Error::Query { store: StoreKind::Primary, .. }));
    }
}
