//! Single-table conditions.
//!
//! A `TableQuery` is what the engine hands to a [`TableExecutor`](crate::TableExecutor):
//! equality and set filters, paging, projection and ordering for one table.
//! Executors that cannot push conditions down can use [`TableQuery::apply`]
//! to evaluate them over scanned rows.

use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::{loose_eq, Row};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// Request key selecting projected columns.
pub const KEY_COLUMN: &str = "@column";
/// Request key selecting sort order, e.g. `"date-,id+"`.
pub const KEY_ORDER: &str = "@order";
/// Role marker consumed by access conditions and write structures.
pub const KEY_ROLE: &str = "@role";
pub const KEY_PAGE: &str = "page";
pub const KEY_COUNT: &str = "count";
/// Suffix marking a set-membership filter (`id{}: [1, 2]`).
pub const IN_SUFFIX: &str = "{}";

/// One row filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => column,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq { value, .. } => loose_eq(actual, value),
            Filter::In { values, .. } => values.iter().any(|v| loose_eq(actual, v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Accumulated conditions for one single-table query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableQuery {
    filters: Vec<Filter>,
    page: u64,
    count: u64,
    columns: Option<Vec<String>>,
    order: Vec<OrderBy>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a condition map into this query.
    ///
    /// May be called repeatedly: filters accumulate (AND), paging and
    /// projection keys overwrite what was set before.
    pub fn parse_condition(&mut self, conditions: &Row) -> ApiJsonResult<()> {
        for (key, value) in conditions {
            match key.as_str() {
                KEY_PAGE => self.page = parse_u64(key, value)?,
                KEY_COUNT => self.count = parse_u64(key, value)?,
                KEY_COLUMN => self.columns = Some(parse_list(key, value)?),
                KEY_ORDER => self.order = parse_order(value)?,
                KEY_ROLE => {}
                k if k.starts_with('@') => {
                    return Err(ApiJsonError::InvalidCondition(format!(
                        "unsupported directive '{}'",
                        k
                    )))
                }
                k if k.ends_with(IN_SUFFIX) => {
                    let column = &k[..k.len() - IN_SUFFIX.len()];
                    match value {
                        Value::Array(values) => self.add_in(column, values.clone()),
                        _ => {
                            return Err(ApiJsonError::InvalidCondition(format!(
                                "'{}' expects an array",
                                k
                            )))
                        }
                    }
                }
                k => match value {
                    Value::Array(_) => {
                        return Err(ApiJsonError::InvalidCondition(format!(
                            "'{}' is an array, use '{}{}' for set membership",
                            k, k, IN_SUFFIX
                        )))
                    }
                    Value::Object(_) => {
                        return Err(ApiJsonError::InvalidCondition(format!(
                            "'{}' is an object, not a condition",
                            k
                        )))
                    }
                    v => self.add_eq(k, v.clone()),
                },
            }
        }
        Ok(())
    }

    pub fn add_eq(&mut self, column: &str, value: Value) {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value,
        });
    }

    pub fn add_in(&mut self, column: &str, values: Vec<Value>) {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values,
        });
    }

    /// Set the page window; `count == 0` means unpaginated.
    pub fn set_window(&mut self, page: u64, count: u64) {
        self.page = page;
        self.count = count;
    }

    /// Drop any paging so every matching row is returned.
    pub fn unpaginated(&mut self) {
        self.set_window(0, 0);
    }

    /// Clamp a client-supplied page size.
    pub fn cap_count(&mut self, max: u64) {
        if max > 0 && self.count > max {
            self.count = max;
        }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    /// Rows to skip. Pages are 1-based; page 0 is read as page 1.
    pub fn offset(&self) -> usize {
        if self.count == 0 {
            0
        } else {
            (self.page.max(1) - 1).saturating_mul(self.count) as usize
        }
    }

    pub fn limit(&self) -> Option<usize> {
        (self.count > 0).then_some(self.count as usize)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Number of rows matching the filters, ignoring paging.
    pub fn count_matching<'a, I>(&self, rows: I) -> u64
    where
        I: IntoIterator<Item = &'a Row>,
    {
        rows.into_iter().filter(|row| self.matches(row)).count() as u64
    }

    /// Filter, sort, page and project scanned rows.
    pub fn apply<I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut matched: Vec<Row> = rows.into_iter().filter(|row| self.matches(row)).collect();

        if !self.order.is_empty() {
            matched.sort_by(|a, b| {
                for o in &self.order {
                    let ord = compare_values(
                        a.get(&o.column).unwrap_or(&Value::Null),
                        b.get(&o.column).unwrap_or(&Value::Null),
                    );
                    let ord = if o.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let windowed = matched
            .into_iter()
            .skip(self.offset())
            .take(self.limit().unwrap_or(usize::MAX));

        match &self.columns {
            Some(columns) => windowed
                .map(|row| {
                    columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect(),
            None => windowed.collect(),
        }
    }
}

fn parse_u64(key: &str, value: &Value) -> ApiJsonResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ApiJsonError::InvalidCondition(format!("'{}' must be a non-negative integer", key))
    })
}

fn parse_list(key: &str, value: &Value) -> ApiJsonResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str().map(String::from).ok_or_else(|| {
                    ApiJsonError::InvalidCondition(format!("'{}' entries must be strings", key))
                })
            })
            .collect(),
        _ => Err(ApiJsonError::InvalidCondition(format!(
            "'{}' must be a comma separated string",
            key
        ))),
    }
}

fn parse_order(value: &Value) -> ApiJsonResult<Vec<OrderBy>> {
    parse_list(KEY_ORDER, value)?
        .into_iter()
        .map(|item| {
            let (column, descending) = if let Some(c) = item.strip_suffix('-') {
                (c, true)
            } else if let Some(c) = item.strip_suffix('+') {
                (c, false)
            } else {
                (item.as_str(), false)
            };
            if column.is_empty() {
                return Err(ApiJsonError::InvalidCondition(format!(
                    "empty column in '{}'",
                    KEY_ORDER
                )));
            }
            Ok(OrderBy {
                column: column.to_string(),
                descending,
            })
        })
        .collect()
}

/// Total order over JSON scalars: null < bool < number < string < others.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
