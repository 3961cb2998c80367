use apijson_core::{
    ApiJsonResult, RequestContext, Row, TableExecutor, TableQuery, TransactionalStore, WriteTransaction,
};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{Options, WriteBatch, DB};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::codec;
use super::transaction::StorageTransaction;
use crate::error::{DbError, DbResult};

/// The row store backed by RocksDB
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<DB>,
    /// Database path
    path: PathBuf,
    /// Next-id counters per table, loaded lazily
    sequences: Arc<DashMap<String, Arc<AtomicU64>>>,
    /// Serialises transaction commits
    commit_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish()
    }
}

impl StorageEngine {
    /// Open (or create) the store in `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> DbResult<Self> {
        let path = data_dir.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Limit WAL file size to prevent unbounded disk growth
        opts.set_max_total_wal_size(50 * 1024 * 1024);
        opts.set_keep_log_file_num(5);

        let db = DB::open(&opts, &path)
            .map_err(|e| DbError::InternalError(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            path,
            sequences: Arc::new(DashMap::new()),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Get the data directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// All committed rows of a table with their storage keys, in key order
    pub fn scan(&self, table: &str) -> DbResult<Vec<(Vec<u8>, Row)>> {
        let prefix = codec::table_prefix(table);
        let mut rows = Vec::new();
        for item in self.db.prefix_iterator(&prefix) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let row: Row = serde_json::from_slice(&value)?;
            rows.push((key.to_vec(), row));
        }
        Ok(rows)
    }

    pub fn rows(&self, table: &str) -> DbResult<Vec<Row>> {
        Ok(self.scan(table)?.into_iter().map(|(_, row)| row).collect())
    }

    pub fn get_row(&self, table: &str, key: &Value) -> DbResult<Option<Row>> {
        match self.db.get(codec::row_key(table, key)?)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Import rows in one transaction. Rows without a `row_key` get ids.
    pub fn import(&self, table: &str, row_key: &str, rows: Vec<Value>) -> DbResult<usize> {
        let ctx = RequestContext::anonymous();
        let mut tx = self.begin(&ctx)?;
        let mut count = 0;
        for value in rows {
            let Value::Object(row) = value else {
                tx.rollback();
                return Err(DbError::BadRequest(format!("{} rows must be objects", table)));
            };
            if let Err(e) = tx.insert(table, row_key, row) {
                tx.rollback();
                return Err(e.into());
            }
            count += 1;
        }
        tx.commit()?;
        tracing::info!("Imported {} rows into {}", count, table);
        Ok(count)
    }

    pub(super) fn contains_key(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.db.get_pinned(key)?.is_some())
    }

    /// Next auto-increment id of a table
    pub(super) fn next_id(&self, table: &str, row_key: &str) -> DbResult<u64> {
        Ok(self.sequence(table, row_key)?.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Make sure later generated ids stay above an explicitly given one
    pub(super) fn bump_sequence(&self, table: &str, row_key: &str, id: u64) -> DbResult<()> {
        self.sequence(table, row_key)?.fetch_max(id, Ordering::SeqCst);
        Ok(())
    }

    pub(super) fn current_sequence(&self, table: &str) -> Option<u64> {
        self.sequences.get(table).map(|c| c.load(Ordering::SeqCst))
    }

    fn sequence(&self, table: &str, row_key: &str) -> DbResult<Arc<AtomicU64>> {
        if let Some(counter) = self.sequences.get(table).map(|c| c.clone()) {
            return Ok(counter);
        }
        let start = self.initial_sequence(table, row_key)?;
        Ok(self
            .sequences
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(start)))
            .clone())
    }

    /// Highest of the persisted sequence and the largest integer id on disk
    fn initial_sequence(&self, table: &str, row_key: &str) -> DbResult<u64> {
        let persisted = match self.db.get(codec::seq_key(table))? {
            Some(bytes) => String::from_utf8_lossy(&bytes).parse::<u64>().unwrap_or(0),
            None => 0,
        };
        let highest = self
            .scan(table)?
            .iter()
            .filter_map(|(_, row)| row.get(row_key).and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        Ok(persisted.max(highest))
    }

    pub(super) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    pub(super) fn write(&self, batch: WriteBatch) -> DbResult<()> {
        self.db
            .write(batch)
            .map_err(|e| DbError::InternalError(format!("Failed to commit batch: {}", e)))
    }
}

impl TableExecutor for StorageEngine {
    fn fetch(&self, _ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<Vec<Row>> {
        let rows = self.rows(table)?;
        let scanned = rows.len();
        let rows = query.apply(rows);
        tracing::debug!(table = %table, scanned, returned = rows.len(), "fetch");
        Ok(rows)
    }

    fn total(&self, _ctx: &RequestContext, table: &str, query: &TableQuery) -> ApiJsonResult<u64> {
        let rows = self.rows(table)?;
        Ok(query.count_matching(rows.iter()))
    }
}

impl TransactionalStore for StorageEngine {
    fn begin(&self, _ctx: &RequestContext) -> ApiJsonResult<Box<dyn WriteTransaction + '_>> {
        Ok(Box::new(StorageTransaction::new(self)))
    }
}
