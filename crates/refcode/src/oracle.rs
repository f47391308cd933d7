//! Cross-store uniqueness check.
//!
//! A candidate is unique when neither the primary store's code column nor the
//! secondary store's referral column holds it. The check takes no lock and
//! reserves nothing: two tasks can both see the same candidate as unique and
//! both try to write it. The code space (26^8) is large enough that this is
//! rare, and the primary write relies on the store's unique constraint to turn
//! the race into a [`Error::Conflict`](crate::Error::Conflict) that the task
//! answers by regenerating.

use crate::{
    Error, Result,
    code::Code,
    store::{Connection, Query, Schema},
};

/// Returns `true` iff no primary entity has `candidate` as its code and no
/// secondary entity has it as its referral code.
///
/// The primary store is consulted first; the secondary store is only queried
/// when the primary is clear.
///
/// # Errors
/// Propagates store errors unchanged, and [`Error::Decode`] if a count row is
/// malformed.
pub async fn is_unique<A, B>(
    candidate: &Code,
    schema: &Schema,
    primary: &mut A,
    secondary: &mut B,
) -> Result<bool>
where
    A: Connection,
    B: Connection,
{
    let value = candidate.as_str();
    if count(primary, &schema.count_primary_code(value)).await? > 0 {
        return Ok(false);
    }
    Ok(count(secondary, &schema.count_secondary_code(value)).await? == 0)
}

async fn count<C: Connection>(conn: &mut C, query: &Query<'_>) -> Result<i64> {
    let rows = conn.execute_read(query).await?;
    rows.first()
        .ok_or_else(|| Error::decode("count query returned no rows"))?
        .int(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, Operation};
    use crate::store::{Connector, StoreKind, Value};

    fn stores() -> (MemoryStore, MemoryStore) {
        let a = MemoryStore::new(StoreKind::Primary);
        a.insert("user", &[("id", Value::Int(1)), ("user_code", Value::Text("AAAAAAAA".into()))]);
        let b = MemoryStore::new(StoreKind::Secondary);
        b.insert(
            "user_info",
            &[("user_id", Value::Int(1)), ("referral_code", Value::Text("BBBBBBBB".into()))],
        );
        (a, b)
    }

    #[tokio::test]
    async fn candidate_taken_in_either_store_is_not_unique() {
        let schema = Schema::users();
        let (a, b) = stores();
        let mut ca = a.connector().connect().await.unwrap();
        let mut cb = b.connector().connect().await.unwrap();

        let taken_a: Code = "AAAAAAAA".parse().unwrap();
        let taken_b: Code = "BBBBBBBB".parse().unwrap();
        let free: Code = "CCCCCCCC".parse().unwrap();

        assert!(!is_unique(&taken_a, &schema, &mut ca, &mut cb).await.unwrap());
        assert!(!is_unique(&taken_b, &schema, &mut ca, &mut cb).await.unwrap());
        assert!(is_unique(&free, &schema, &mut ca, &mut cb).await.unwrap());
    }

    #[tokio::test]
    async fn secondary_is_skipped_when_primary_collides() {
        let schema = Schema::users();
        let (a, b) = stores();
        let mut ca = a.connector().connect().await.unwrap();
        let mut cb = b.connector().connect().await.unwrap();

        let taken_a: Code = "AAAAAAAA".parse().unwrap();
        is_unique(&taken_a, &schema, &mut ca, &mut cb).await.unwrap();
        assert_eq!(a.reads(), 1);
        assert_eq!(b.reads(), 0);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let schema = Schema::users();
        let (a, b) = stores();
        b.set_fault_hook(|op| {
            matches!(op, Operation::Read(_)).then(|| Error::Connection {
                store: StoreKind::Secondary,
                reason: "server has gone away".into(),
            })
        });
        let mut ca = a.connector().connect().await.unwrap();
        let mut cb = b.connector().connect().await.unwrap();

        let free: Code = "CCCCCCCC".parse().unwrap();
        let err = is_unique(&free, &schema, &mut ca, &mut cb).await.unwrap_err();
        assert!(err.is_transient());
    }
}
