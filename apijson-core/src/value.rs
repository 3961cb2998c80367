//! Row and node result types.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// One table row: column name to value.
pub type Row = Map<String, Value>;

/// What a node holds after execution.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// A list node with no rows (never queried, or nothing matched).
    EmptyList,
    /// A list node's rows, in executor order.
    RowList(Vec<Row>),
    /// A singular node's row, absent when nothing matched.
    SingleRow(Option<Row>),
    /// A plain or referenced value.
    Scalar(Value),
}

impl NodeResult {
    /// Empty result for a node of the given list-ness.
    pub fn empty(is_list: bool) -> Self {
        if is_list {
            NodeResult::EmptyList
        } else {
            NodeResult::SingleRow(None)
        }
    }

    /// Wrap executor rows according to list-ness. A singular node keeps only the first row.
    pub fn from_rows(rows: Vec<Row>, is_list: bool) -> Self {
        if is_list {
            if rows.is_empty() {
                NodeResult::EmptyList
            } else {
                NodeResult::RowList(rows)
            }
        } else {
            NodeResult::SingleRow(rows.into_iter().next())
        }
    }

    /// Rows held by this result; scalars have none.
    pub fn rows(&self) -> &[Row] {
        match self {
            NodeResult::RowList(rows) => rows,
            NodeResult::SingleRow(Some(row)) => std::slice::from_ref(row),
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct non-null values of `column` across all rows, first occurrence order.
    pub fn distinct_column(&self, column: &str) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.rows()
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .filter(|v| seen.insert(fingerprint(v)))
            .cloned()
            .collect()
    }

    /// Convert into the response document value.
    pub fn into_value(self) -> Value {
        match self {
            NodeResult::EmptyList => Value::Array(Vec::new()),
            NodeResult::RowList(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            NodeResult::SingleRow(Some(row)) => Value::Object(row),
            NodeResult::SingleRow(None) => Value::Null,
            NodeResult::Scalar(v) => v,
        }
    }
}

/// String form used for set membership and loose comparison.
pub fn fingerprint(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Equality that treats `1`, `1.0` and `"1"` as the same key value.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_), _) | (_, Value::Array(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => {
            a == b
        }
        _ => fingerprint(a) == fingerprint(b),
    }
}

/// Strip the trailing `@` of a reference key.
pub fn strip_ref_suffix(key: &str) -> &str {
    key.strip_suffix('@').unwrap_or(key)
}
