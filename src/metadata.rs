//! Loads access rules and request templates from the `_access` and
//! `_request` tables, and seeds a fresh store from a JSON file.

use apijson_core::{Access, Metadata, RequestRow, Row};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{DbError, DbResult};
use crate::storage::StorageEngine;

pub const ACCESS_TABLE: &str = "_access";
pub const REQUEST_TABLE: &str = "_request";

/// Contents of a `--seed` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub access: Vec<Value>,
    pub request: Vec<Value>,
    /// Rows per table, keyed by table name or alias.
    pub data: BTreeMap<String, Vec<Value>>,
}

/// Build metadata from the store. Malformed rows are skipped with a warning.
pub fn load(storage: &StorageEngine) -> DbResult<Metadata> {
    let access: Vec<Access> = decode_rows(storage, ACCESS_TABLE)?;
    let requests: Vec<RequestRow> = decode_rows(storage, REQUEST_TABLE)?;
    let (tables, templates) = (access.len(), requests.len());

    let metadata = Metadata::from_parts(access, requests)?;
    tracing::info!("Loaded {} access rules and {} request templates", tables, templates);
    Ok(metadata)
}

fn decode_rows<T>(storage: &StorageEngine, table: &str) -> DbResult<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut out = Vec::new();
    for row in storage.rows(table)? {
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value(Value::Object(row)) {
            Ok(item) => out.push(item),
            Err(e) => tracing::warn!("Skipping {} row {}: {}", table, id, e),
        }
    }
    Ok(out)
}

/// Import a seed file. Returns the number of rows written.
pub fn seed_from_file(storage: &StorageEngine, path: &Path) -> DbResult<usize> {
    let text = std::fs::read_to_string(path)?;
    let seed: Seed = serde_json::from_str(&text)?;
    tracing::info!("Seeding from {}", path.display());
    seed_store(storage, seed)
}

pub fn seed_store(storage: &StorageEngine, seed: Seed) -> DbResult<usize> {
    // Validate before writing anything
    let rules = seed
        .access
        .iter()
        .map(|v| serde_json::from_value::<Access>(v.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::BadRequest(format!("invalid access rule in seed: {}", e)))?;
    let requests = seed
        .request
        .iter()
        .map(|v| serde_json::from_value::<RequestRow>(v.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::BadRequest(format!("invalid request row in seed: {}", e)))?;
    Metadata::from_parts(rules.clone(), requests)?;

    let mut written = storage.import(ACCESS_TABLE, "id", seed.access)?;
    written += storage.import(REQUEST_TABLE, "id", seed.request)?;

    for (key, rows) in seed.data {
        let rule = rules.iter().find(|a| a.key() == key || a.name == key);
        let (table, row_key) = match rule {
            Some(a) => (a.name.as_str(), a.row_key.as_str()),
            None => (key.as_str(), "id"),
        };
        written += storage.import(table, row_key, rows)?;
    }
    Ok(written)
}

/// Rows of a JSON value that must be an object.
pub fn object_rows(value: Value) -> DbResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(DbError::BadRequest(format!("expected a JSON object, got {}", type_name(&other)))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
