//! Single-table executor capability.
//!
//! The engine never joins: every node becomes one call to a [`TableExecutor`]
//! (reads) or to a [`WriteTransaction`] (writes). Storage backends implement
//! these traits; [`InMemoryStore`] is the reference implementation used by
//! the engine's own tests.

mod memory;

pub use memory::{InMemoryStore, RecordedCall};

use crate::access::RequestContext;
use crate::condition::TableQuery;
use crate::error::ApiJsonResult;
use crate::value::Row;
use serde::Serialize;
use serde_json::Value;

/// Read side of a store.
pub trait TableExecutor: Send + Sync {
    /// Rows of `table` matching the query, paged and projected.
    fn fetch(&self, ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<Vec<Row>>;

    /// Number of rows matching the query's filters, ignoring paging.
    fn total(&self, ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<u64>;
}

/// Result of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    /// Row key of the inserted row, or of the single addressed row.
    pub id: Option<Value>,
    /// Rows affected.
    pub count: u64,
}

/// Mutations sharing one atomic boundary.
///
/// Writes are visible to later calls on the same transaction and to nobody
/// else until [`commit`](WriteTransaction::commit).
pub trait WriteTransaction {
    /// Insert a row. When `row` has no `row_key` column the store assigns an
    /// increasing integer and reports it as the outcome id.
    fn insert(&mut self, table: &str, row_key: &str, row: Row) -> ApiJsonResult<WriteOutcome>;

    fn update(&mut self, table: &str, query: &TableQuery, changes: &Row) -> ApiJsonResult<WriteOutcome>;

    fn delete(&mut self, table: &str, query: &TableQuery) -> ApiJsonResult<WriteOutcome>;

    fn commit(self: Box<Self>) -> ApiJsonResult<()>;

    fn rollback(self: Box<Self>);
}

/// A store that can open write transactions.
pub trait TransactionalStore: TableExecutor {
    fn begin(&self, ctx: &RequestContext) -> ApiJsonResult<Box<dyn WriteTransaction + '_>>;
}
