use super::{TableExecutor, TransactionalStore, WriteOutcome, WriteTransaction};
use crate::access::RequestContext;
use crate::condition::TableQuery;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::{loose_eq, Row};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A read issued against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Fetch { table: String, query: TableQuery },
    Total { table: String, query: TableQuery },
}

impl RecordedCall {
    pub fn table(&self) -> &str {
        match self {
            RecordedCall::Fetch { table, .. } | RecordedCall::Total { table, .. } => table,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Row>>,
    sequences: HashMap<String, u64>,
    calls: Vec<RecordedCall>,
    fail_reads: HashSet<String>,
    fail_writes: HashSet<String>,
    commits: u64,
}

/// In-memory store for tests.
///
/// Records every read so tests can assert which queries ran, and can be told
/// to fail reads or writes on chosen tables. Transactions work on a private
/// copy of all tables that replaces the shared state on commit.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows directly, bypassing transactions and call recording.
    pub fn insert_rows(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock();
        let target = state.tables.entry(table.to_string()).or_default();
        target.extend(rows.into_iter().filter_map(|v| match v {
            Value::Object(row) => Some(row),
            _ => None,
        }));
    }

    /// Current committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Queries passed to `fetch` for one table, in call order.
    pub fn fetches_of(&self, table: &str) -> Vec<TableQuery> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Fetch { table: t, query } if t == table => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    pub fn fail_reads_from(&self, table: &str) {
        self.state.lock().fail_reads.insert(table.to_string());
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.state.lock().fail_writes.insert(table.to_string());
    }

    fn read(&self, call: RecordedCall) -> ApiJsonResult<Vec<Row>> {
        let mut state = self.state.lock();
        let table = call.table().to_string();
        state.calls.push(call);
        if state.fail_reads.contains(&table) {
            return Err(ApiJsonError::Executor(format!("injected read failure on {}", table)));
        }
        Ok(state.tables.get(&table).cloned().unwrap_or_default())
    }
}

impl TableExecutor for InMemoryStore {
    fn fetch(&self, _ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<Vec<Row>> {
        let rows = self.read(RecordedCall::Fetch {
            table: table.to_string(),
            query: query.clone(),
        })?;
        Ok(query.apply(rows))
    }

    fn total(&self, _ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<u64> {
        let rows = self.read(RecordedCall::Total {
            table: table.to_string(),
            query: query.clone(),
        })?;
        Ok(query.count_matching(rows.iter()))
    }
}

impl TransactionalStore for InMemoryStore {
    fn begin(&self, _ctx: &RequestContext) -> ApiJsonResult<Box<dyn WriteTransaction + '_>> {
        let state = self.state.lock();
        Ok(Box::new(MemoryTransaction {
            store: self,
            tables: state.tables.clone(),
            sequences: state.sequences.clone(),
            fail_writes: state.fail_writes.clone(),
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a InMemoryStore,
    tables: BTreeMap<String, Vec<Row>>,
    sequences: HashMap<String, u64>,
    fail_writes: HashSet<String>,
}

impl MemoryTransaction<'_> {
    fn check_writable(&self, table: &str) -> ApiJsonResult<()> {
        if self.fail_writes.contains(table) {
            return Err(ApiJsonError::Executor(format!("injected write failure on {}", table)));
        }
        Ok(())
    }

    fn next_id(&mut self, table: &str, row_key: &str) -> u64 {
        let highest = self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.get(row_key).and_then(Value::as_u64))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        let seq = self.sequences.entry(table.to_string()).or_insert(0);
        *seq = (*seq).max(highest) + 1;
        *seq
    }
}

impl WriteTransaction for MemoryTransaction<'_> {
    fn insert(&mut self, table: &str, row_key: &str, mut row: Row) -> ApiJsonResult<WriteOutcome> {
        self.check_writable(table)?;

        let given = row.get(row_key).filter(|v| !v.is_null()).cloned();
        let id = match given {
            Some(v) => v,
            None => {
                let id = Value::from(self.next_id(table, row_key));
                row.insert(row_key.to_string(), id.clone());
                id
            }
        };

        let rows = self.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| r.get(row_key).is_some_and(|v| loose_eq(v, &id))) {
            return Err(ApiJsonError::Executor(format!("duplicate key {} in {}", id, table)));
        }
        rows.push(row);

        Ok(WriteOutcome {
            id: Some(id),
            count: 1,
        })
    }

    fn update(&mut self, table: &str, query: &TableQuery, changes: &Row) -> ApiJsonResult<WriteOutcome> {
        self.check_writable(table)?;
        let mut count = 0;
        for row in self.tables.entry(table.to_string()).or_default() {
            if query.matches(row) {
                for (k, v) in changes {
                    row.insert(k.clone(), v.clone());
                }
                count += 1;
            }
        }
        Ok(WriteOutcome { id: None, count })
    }

    fn delete(&mut self, table: &str, query: &TableQuery) -> ApiJsonResult<WriteOutcome> {
        self.check_writable(table)?;
        let rows = self.tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !query.matches(row));
        Ok(WriteOutcome {
            id: None,
            count: (before - rows.len()) as u64,
        })
    }

    fn commit(self: Box<Self>) -> ApiJsonResult<()> {
        let mut state = self.store.state.lock();
        state.tables = self.tables;
        state.sequences = self.sequences;
        state.commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}
