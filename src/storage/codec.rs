use crate::error::{DbError, DbResult};
use serde_json::Value;

const ROW_PREFIX: &str = "row:";
const SEQ_PREFIX: &str = "seq:";

/// Width of zero-padded integer keys, enough for any `u64`.
const INT_KEY_WIDTH: usize = 20;

/// Prefix shared by every row of a table.
pub fn table_prefix(table: &str) -> Vec<u8> {
    format!("{}{}:", ROW_PREFIX, table).into_bytes()
}

/// Build a row key: `row:{table}:{key}`
pub fn row_key(table: &str, key: &Value) -> DbResult<Vec<u8>> {
    let mut out = table_prefix(table);
    out.extend_from_slice(encode_key(key)?.as_bytes());
    Ok(out)
}

/// Key under which a table's id sequence is persisted
pub fn seq_key(table: &str) -> Vec<u8> {
    format!("{}{}", SEQ_PREFIX, table).into_bytes()
}

/// Encode a row key value. Unsigned integers are zero-padded so a prefix
/// scan returns rows in id order.
pub fn encode_key(value: &Value) -> DbResult<String> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(u) => Ok(format!("{:0width$}", u, width = INT_KEY_WIDTH)),
            None => Ok(n.to_string()),
        },
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        other => Err(DbError::BadRequest(format!(
            "row key must be a non-empty string or a number, got {}",
            other
        ))),
    }
}
