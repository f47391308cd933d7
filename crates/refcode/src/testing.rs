//! Shared fixtures for unit tests.

use std::sync::Arc;

use portable_atomic::{AtomicUsize, Ordering};

use crate::{
    code::Code,
    pool::ConnectionPool,
    rand::RandSource,
    store::{
        Schema, StoreKind, Value,
        memory::{MemoryConnector, MemoryStore},
    },
    task::Assigner,
};

pub(crate) type MemoryAssigner<R = crate::rand::ThreadRandom> =
    Assigner<MemoryConnector, MemoryConnector, R>;

/// Two in-memory stores laid out like [`Schema::users`], with unique
/// constraints on both code columns.
pub(crate) struct Fixture {
    pub(crate) a: MemoryStore,
    pub(crate) b: MemoryStore,
    pub(crate) schema: Schema,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let a = MemoryStore::new(StoreKind::Primary);
        a.create_table("user", &["user_code"]);
        a.create_table("user_bridge", &[]);
        let b = MemoryStore::new(StoreKind::Secondary);
        b.create_table("user_info", &["referral_code"]);
        Self {
            a,
            b,
            schema: Schema::users(),
        }
    }

    /// `n` entities with ids `1..=n`, bridge id equal to the entity id, and no
    /// codes anywhere.
    pub(crate) fn population(n: i64) -> Self {
        let fixture = Self::new();
        for id in 1..=n {
            fixture.add_user(id, code(None));
            fixture.add_bridge(id, id);
            fixture.add_info(id, code(None));
        }
        fixture
    }

    pub(crate) fn add_user(&self, id: i64, code: Value) {
        self.a.insert("user", &[("id", Value::Int(id)), ("user_code", code)]);
    }

    pub(crate) fn add_bridge(&self, bridge: i64, user: i64) {
        self.a
            .insert("user_bridge", &[("id", Value::Int(bridge)), ("user_id", Value::Int(user))]);
    }

    pub(crate) fn add_info(&self, key: i64, code: Value) {
        self.b
            .insert("user_info", &[("user_id", Value::Int(key)), ("referral_code", code)]);
    }

    pub(crate) fn user_code(&self, id: i64) -> Option<String> {
        text(self.a.get("user", "id", id, "user_code"))
    }

    pub(crate) fn referral_code(&self, key: i64) -> Option<String> {
        text(self.b.get("user_info", "user_id", key, "referral_code"))
    }

    pub(crate) fn pools(
        &self,
        size: usize,
    ) -> (Arc<ConnectionPool<MemoryConnector>>, Arc<ConnectionPool<MemoryConnector>>) {
        let a = ConnectionPool::lazy(StoreKind::Primary, self.a.connector(), size).unwrap();
        let b = ConnectionPool::lazy(StoreKind::Secondary, self.b.connector(), size).unwrap();
        (Arc::new(a), Arc::new(b))
    }

    pub(crate) fn assigner(&self, pool_size: usize) -> MemoryAssigner {
        let (a, b) = self.pools(pool_size);
        Assigner::new(a, b, self.schema.clone())
    }
}

pub(crate) fn code(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

fn text(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::Text(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Replays a fixed list of codes, then repeats the last one.
pub(crate) struct ScriptedRand {
    draws: Vec<u64>,
    next: AtomicUsize,
}

impl ScriptedRand {
    pub(crate) fn codes(codes: &[&str]) -> Self {
        let draws = codes
            .iter()
            .map(|c| index_of(&c.parse::<Code>().unwrap()))
            .collect();
        Self {
            draws,
            next: AtomicUsize::new(0),
        }
    }
}

impl RandSource<u64> for ScriptedRand {
    fn rand(&self) -> u64 {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.draws[i.min(self.draws.len() - 1)]
    }
}

fn index_of(code: &Code) -> u64 {
    code.as_str()
        .bytes()
        .fold(0, |acc, b| acc * 26 + u64::from(b - b'A'))
}
