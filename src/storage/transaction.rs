use apijson_core::{ApiJsonError, ApiJsonResult, Row, TableQuery, WriteOutcome, WriteTransaction};
use rocksdb::WriteBatch;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::codec;
use super::engine::StorageEngine;
use crate::error::DbResult;

/// Buffered writes of one request.
///
/// Mutations go into a `WriteBatch` and an overlay, so later nodes of the
/// same request read what earlier nodes wrote. Nothing reaches RocksDB until
/// commit writes the batch atomically.
pub struct StorageTransaction<'a> {
    engine: &'a StorageEngine,
    batch: WriteBatch,
    /// Pending value per storage key; `None` marks a delete
    overlay: BTreeMap<Vec<u8>, Option<Row>>,
    /// Tables whose id sequence moved
    sequenced: BTreeSet<String>,
}

impl<'a> StorageTransaction<'a> {
    pub fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            batch: WriteBatch::default(),
            overlay: BTreeMap::new(),
            sequenced: BTreeSet::new(),
        }
    }

    /// Committed rows merged with this transaction's pending writes
    fn visible_rows(&self, table: &str) -> DbResult<Vec<(Vec<u8>, Row)>> {
        let prefix = codec::table_prefix(table);
        let mut rows: BTreeMap<Vec<u8>, Row> = self.engine.scan(table)?.into_iter().collect();
        for (key, pending) in self.overlay.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            match pending {
                Some(row) => {
                    rows.insert(key.clone(), row.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        match self.overlay.get(key) {
            Some(pending) => Ok(pending.is_some()),
            None => self.engine.contains_key(key),
        }
    }

    fn put(&mut self, key: Vec<u8>, row: Row) -> DbResult<()> {
        self.batch.put(&key, serde_json::to_vec(&row)?);
        self.overlay.insert(key, Some(row));
        Ok(())
    }

    fn remove(&mut self, key: Vec<u8>) {
        self.batch.delete(&key);
        self.overlay.insert(key, None);
    }
}

impl WriteTransaction for StorageTransaction<'_> {
    fn insert(&mut self, table: &str, row_key: &str, mut row: Row) -> ApiJsonResult<WriteOutcome> {
        let given = row.get(row_key).filter(|v| !v.is_null()).cloned();
        let id = match given {
            Some(id) => {
                if let Some(n) = id.as_u64() {
                    self.engine.bump_sequence(table, row_key, n)?;
                }
                id
            }
            None => {
                let id = Value::from(self.engine.next_id(table, row_key)?);
                row.insert(row_key.to_string(), id.clone());
                id
            }
        };
        self.sequenced.insert(table.to_string());

        let key = codec::row_key(table, &id)?;
        if self.exists(&key)? {
            return Err(ApiJsonError::Executor(format!("duplicate key {} in {}", id, table)));
        }
        self.put(key, row)?;

        Ok(WriteOutcome {
            id: Some(id),
            count: 1,
        })
    }

    fn update(&mut self, table: &str, query: &TableQuery, changes: &Row) -> ApiJsonResult<WriteOutcome> {
        let mut count = 0;
        for (key, mut row) in self.visible_rows(table)? {
            if !query.matches(&row) {
                continue;
            }
            for (k, v) in changes {
                row.insert(k.clone(), v.clone());
            }
            self.put(key, row)?;
            count += 1;
        }
        Ok(WriteOutcome { id: None, count })
    }

    fn delete(&mut self, table: &str, query: &TableQuery) -> ApiJsonResult<WriteOutcome> {
        let mut count = 0;
        for (key, row) in self.visible_rows(table)? {
            if query.matches(&row) {
                self.remove(key);
                count += 1;
            }
        }
        Ok(WriteOutcome { id: None, count })
    }

    fn commit(self: Box<Self>) -> ApiJsonResult<()> {
        let StorageTransaction {
            engine,
            mut batch,
            sequenced,
            ..
        } = *self;

        for table in &sequenced {
            if let Some(seq) = engine.current_sequence(table) {
                batch.put(codec::seq_key(table), seq.to_string());
            }
        }

        let writes = batch.len();
        let _guard = engine.lock_commits();
        engine.write(batch)?;
        tracing::debug!(writes, "transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        tracing::debug!(writes = self.batch.len(), "transaction rolled back");
    }
}
