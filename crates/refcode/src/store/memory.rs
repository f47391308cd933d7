//! In-memory store for tests and benches.
//!
//! [`MemoryStore`] keeps rows in plain maps behind a mutex and evaluates the
//! logical queries directly. Two knobs make it useful as a test double:
//!
//! - a fault hook, consulted before every connect, read, write and commit,
//!   which can fail the operation with any [`Error`];
//! - a per-operation latency, so concurrent tasks actually overlap.
//!
//! Writes apply immediately (autocommit); `commit` only counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};

use super::{Connection, Connector, Query, Row, StoreKind, Value, WriteQuery};
use crate::{Error, Result};

/// An operation about to run against a [`MemoryStore`].
#[derive(Debug)]
pub enum Operation<'a> {
    Connect,
    Read(&'a Query<'a>),
    Write(&'a WriteQuery<'a>),
    Commit,
}

/// Decides whether an operation fails. Returning `Some` fails it with that
/// error before it touches any data.
pub type FaultHook = Arc<dyn Fn(&Operation<'_>) -> Option<Error> + Send + Sync>;

/// A write that changed a row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedWrite {
    pub table: String,
    pub id: i64,
    pub code: String,
}

#[derive(Default)]
struct Table {
    unique: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    applied: Vec<AppliedWrite>,
}

impl State {
    fn rows(&self, kind: StoreKind, table: &str) -> Result<&[HashMap<String, Value>]> {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .ok_or_else(|| Error::Query {
                store: kind,
                reason: format!("table `{table}` does not exist"),
            })
    }
}

struct Inner {
    kind: StoreKind,
    state: Mutex<State>,
    hook: Mutex<Option<FaultHook>>,
    latency: Mutex<Duration>,
    connects: AtomicUsize,
    reads: AtomicUsize,
    write_attempts: AtomicUsize,
    commits: AtomicUsize,
    closes: AtomicUsize,
}

/// A shared handle to an in-memory store. Clones refer to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                state: Mutex::new(State::default()),
                hook: Mutex::new(None),
                latency: Mutex::new(Duration::ZERO),
                connects: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
                write_attempts: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.inner.kind
    }

    /// Creates (or resets) a table. Columns listed in `unique` reject
    /// duplicate non-empty text values on update.
    pub fn create_table(&self, name: &str, unique: &[&str]) {
        let table = Table {
            unique: unique.iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
        };
        self.inner.state.lock().tables.insert(name.to_string(), table);
    }

    /// Inserts a row, creating the table if needed.
    pub fn insert(&self, table: &str, row: &[(&str, Value)]) {
        let row = row
            .iter()
            .map(|(column, value)| ((*column).to_string(), value.clone()))
            .collect();
        self.inner
            .state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .rows
            .push(row);
    }

    /// Returns `column` of the first row whose `key_column` equals `key`.
    pub fn get(&self, table: &str, key_column: &str, key: i64, column: &str) -> Option<Value> {
        let state = self.inner.state.lock();
        let row = state
            .tables
            .get(table)?
            .rows
            .iter()
            .find(|row| row.get(key_column) == Some(&Value::Int(key)))?;
        Some(row.get(column).cloned().unwrap_or(Value::Null))
    }

    /// Returns every value of `column` in `table`, in insertion order.
    pub fn column(&self, table: &str, column: &str) -> Vec<Value> {
        let state = self.inner.state.lock();
        state
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Writes that changed at least one row, in the order they were applied.
    pub fn applied_writes(&self) -> Vec<AppliedWrite> {
        self.inner.state.lock().applied.clone()
    }

    pub fn set_fault_hook(
        &self,
        hook: impl Fn(&Operation<'_>) -> Option<Error> + Send + Sync + 'static,
    ) {
        *self.inner.hook.lock() = Some(Arc::new(hook));
    }

    pub fn clear_fault_hook(&self) {
        *self.inner.hook.lock() = None;
    }

    /// Delay applied before every operation.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { store: self.clone() }
    }

    /// Connection attempts, including failed ones.
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::Relaxed)
    }

    /// Write attempts, including failed and zero-row ones.
    pub fn write_attempts(&self) -> usize {
        self.inner.write_attempts.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::Relaxed)
    }

    async fn before(&self, op: &Operation<'_>) -> Result<()> {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let hook = self.inner.hook.lock().clone();
        match hook.and_then(|hook| hook(op)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read(&self, query: &Query<'_>) -> Result<Vec<Row>> {
        let state = self.inner.state.lock();
        let kind = self.inner.kind;

        match query {
            Query::CountMatching {
                table,
                column,
                value,
            } => {
                let count = state
                    .rows(kind, table.as_str())?
                    .iter()
                    .filter(|row| has_code(row.get(column.as_str()), value))
                    .count();
                Ok(vec![Row::new(vec![Value::Int(count as i64)])])
            }
            Query::SelectCode {
                table,
                id_column,
                id,
                code_column,
            } => {
                let rows = state.rows(kind, table.as_str())?;
                Ok(rows
                    .iter()
                    .find(|row| row.get(id_column.as_str()) == Some(&Value::Int(*id)))
                    .map(|row| {
                        let code = row.get(code_column.as_str()).cloned();
                        Row::new(vec![code.unwrap_or(Value::Null)])
                    })
                    .into_iter()
                    .collect())
            }
            Query::BridgedPairs { primary, bridge } => {
                let primaries = state.rows(kind, primary.table.as_str())?;
                let mut pairs: Vec<(i64, i64)> = state
                    .rows(kind, bridge.table.as_str())?
                    .iter()
                    .filter_map(|row| {
                        let Some(Value::Int(pid)) = row.get(bridge.primary_column.as_str()) else {
                            return None;
                        };
                        let Some(Value::Int(bid)) = row.get(bridge.id_column.as_str()) else {
                            return None;
                        };
                        primaries
                            .iter()
                            .any(|p| p.get(primary.id_column.as_str()) == Some(&Value::Int(*pid)))
                            .then_some((*pid, *bid))
                    })
                    .collect();
                pairs.sort_unstable();
                Ok(pairs
                    .into_iter()
                    .map(|(pid, bid)| Row::new(vec![Value::Int(pid), Value::Int(bid)]))
                    .collect())
            }
            Query::MissingCodes {
                table,
                key_column,
                code_column,
            } => {
                let rows = state.rows(kind, table.as_str())?;
                Ok(rows
                    .iter()
                    .filter(|row| is_empty_code(row.get(code_column.as_str())))
                    .filter_map(|row| match row.get(key_column.as_str()) {
                        Some(Value::Int(key)) => Some(Row::new(vec![Value::Int(*key)])),
                        _ => None,
                    })
                    .collect())
            }
        }
    }

    fn write(&self, query: &WriteQuery<'_>) -> Result<u64> {
        let WriteQuery::ConditionalUpdate {
            table,
            id_column,
            id,
            code_column,
            code,
        } = query;

        let mut state = self.inner.state.lock();
        let Some(target) = state.tables.get_mut(table.as_str()) else {
            return Err(Error::Query {
                store: self.inner.kind,
                reason: format!("table `{table}` does not exist"),
            });
        };

        let is_unique = target.unique.iter().any(|c| c == code_column.as_str());
        let mut affected = 0;
        for i in 0..target.rows.len() {
            let row = &target.rows[i];
            if row.get(id_column.as_str()) != Some(&Value::Int(*id))
                || !is_empty_code(row.get(code_column.as_str()))
            {
                continue;
            }
            if is_unique
                && target
                    .rows
                    .iter()
                    .any(|other| has_code(other.get(code_column.as_str()), code))
            {
                return Err(Error::Conflict {
                    store: self.inner.kind,
                    code: (*code).to_string(),
                });
            }
            target.rows[i].insert(
                code_column.as_str().to_string(),
                Value::Text((*code).to_string()),
            );
            affected += 1;
        }

        if affected > 0 {
            state.applied.push(AppliedWrite {
                table: table.as_str().to_string(),
                id: *id,
                code: (*code).to_string(),
            });
        }
        Ok(affected)
    }
}

fn is_empty_code(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Text(s)) => s.is_empty(),
        Some(Value::Int(_)) => false,
    }
}

fn has_code(value: Option<&Value>, code: &str) -> bool {
    matches!(value, Some(Value::Text(v)) if v == code)
}

/// Opens [`MemoryConnection`]s to a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        self.store.inner.connects.fetch_add(1, Ordering::Relaxed);
        self.store.before(&Operation::Connect).await?;
        Ok(MemoryConnection {
            store: self.store.clone(),
        })
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
}

impl Connection for MemoryConnection {
    async fn execute_read(&mut self, query: &Query<'_>) -> Result<Vec<Row>> {
        self.store.inner.reads.fetch_add(1, Ordering::Relaxed);
        self.store.before(&Operation::Read(query)).await?;
        self.store.read(query)
    }

    async fn execute_write(&mut self, query: &WriteQuery<'_>) -> Result<u64> {
        self.store.inner.write_attempts.fetch_add(1, Ordering::Relaxed);
        self.store.before(&Operation::Write(query)).await?;
        self.store.write(query)
    }

    async fn commit(&mut self) -> Result<()> {
        self.store.before(&Operation::Commit).await?;
        self.store.inner.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.store.inner.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
