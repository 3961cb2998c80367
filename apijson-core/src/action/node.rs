use crate::access::{Access, Method, RequestContext, RowKeyGen};
use crate::condition::{TableQuery, IN_SUFFIX};
use crate::config::EngineConfig;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::executor::WriteTransaction;
use crate::metadata::StructureRule;
use crate::value::Row;
use serde::Serialize;
use serde_json::Value;

/// Committed result of one queued node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub code: u16,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// One top-level key of a write request.
#[derive(Debug, Clone)]
pub struct ActionNode {
    key: String,
    structure_key: String,
    table_key: String,
    access: Access,
    rule: StructureRule,
    batch: bool,
    rows: Vec<Row>,
    owner_filter: Option<(String, Value)>,
    outcome: Option<NodeOutcome>,
}

impl ActionNode {
    pub(crate) fn new(key: String, structure_key: String, access: Access, rule: StructureRule, rows: Vec<Row>) -> Self {
        let table_key = structure_key
            .strip_suffix("[]")
            .unwrap_or(&structure_key)
            .to_string();
        Self {
            batch: key.ends_with("[]"),
            key,
            structure_key,
            table_key,
            access,
            rule,
            rows,
            owner_filter: None,
            outcome: None,
        }
    }

    /// Key as sent in the request (`Todo` or `Todo[]`).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn structure_key(&self) -> &str {
        &self.structure_key
    }

    /// Table key without the batch suffix.
    pub fn table_key(&self) -> &str {
        &self.table_key
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }

    pub fn outcome(&self) -> Option<&NodeOutcome> {
        self.outcome.as_ref()
    }

    fn answers_to(&self, name: &str) -> bool {
        self.key == name || self.structure_key == name || self.table_key == name
    }

    /// Apply the template's rewrite rules to every row.
    ///
    /// `INSERT` values fill gaps, `UPDATE` values overwrite. An `OWNER`
    /// marker writes the caller's id on POST and filters by it otherwise.
    pub(crate) fn req_update(&mut self, ctx: &RequestContext, config: &EngineConfig, method: Method) -> ApiJsonResult<()> {
        let owner = if self.rule.owner_marked() {
            let user_id = ctx.user_id.clone().ok_or_else(|| ApiJsonError::Forbidden {
                method: method.to_string(),
                table: self.key.clone(),
            })?;
            Some(Value::String(user_id))
        } else {
            None
        };
        let owner_column = self.access.owner_column(&config.owner_column).to_string();
        let row_key = self.access.row_key.clone();

        for row in &mut self.rows {
            row.retain(|k, _| !k.starts_with('@'));
            for (k, v) in self.rule.insert.iter().filter(|(k, _)| !k.starts_with('@')) {
                row.entry(k.clone()).or_insert_with(|| v.clone());
            }
            for (k, v) in self.rule.update.iter().filter(|(k, _)| !k.starts_with('@')) {
                row.insert(k.clone(), v.clone());
            }

            if method == Method::Post {
                if let Some(owner) = &owner {
                    row.insert(owner_column.clone(), owner.clone());
                }
                let missing_key = row.get(&row_key).map_or(true, Value::is_null);
                if missing_key && self.access.row_key_gen == RowKeyGen::Uuid {
                    row.insert(row_key.clone(), Value::String(uuid::Uuid::now_v7().to_string()));
                }
            }
        }

        if method != Method::Post {
            self.owner_filter = owner.map(|o| (owner_column, o));
        }
        tracing::debug!(node = %self.key, rows = self.rows.len(), "request updated");
        Ok(())
    }

    /// Run this node's mutation inside the shared transaction.
    ///
    /// `earlier` holds the nodes already executed, for write references.
    pub(crate) fn execute(
        &mut self,
        tx: &mut dyn WriteTransaction,
        method: Method,
        earlier: &[ActionNode],
    ) -> ApiJsonResult<()> {
        let mut rows = std::mem::take(&mut self.rows);
        let result = self.execute_rows(&mut rows, tx, method, earlier);
        self.rows = rows;
        let (ids, count) = result?;

        let id = if self.batch {
            Some(Value::Array(ids))
        } else {
            ids.into_iter().next().filter(|v| !v.is_null())
        };
        tracing::debug!(node = %self.key, %method, count, "node executed");
        self.outcome = Some(NodeOutcome { code: 200, count, id });
        Ok(())
    }

    fn execute_rows(
        &self,
        rows: &mut [Row],
        tx: &mut dyn WriteTransaction,
        method: Method,
        earlier: &[ActionNode],
    ) -> ApiJsonResult<(Vec<Value>, u64)> {
        let table = &self.access.name;
        let row_key = &self.access.row_key;
        let mut ids = Vec::with_capacity(rows.len());
        let mut count = 0;

        for row in rows.iter_mut() {
            self.resolve_refs(row, earlier)?;
            match method {
                Method::Post => {
                    let out = tx.insert(table, row_key, row.clone())?;
                    if let Some(id) = &out.id {
                        row.insert(row_key.clone(), id.clone());
                    }
                    ids.push(out.id.unwrap_or(Value::Null));
                    count += out.count;
                }
                Method::Put => {
                    let (query, id) = self.row_query(row, method, false)?;
                    // An owned row keeps its owner.
                    let owner_column = self.owner_filter.as_ref().map(|(column, _)| column.as_str());
                    let changes: Row = row
                        .iter()
                        .filter(|(k, _)| !self.is_row_key(k) && Some(k.as_str()) != owner_column)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if changes.is_empty() {
                        return Err(ApiJsonError::structure(format!("PUT {} has nothing to update", self.key)));
                    }
                    count += tx.update(table, &query, &changes)?.count;
                    ids.push(id);
                }
                Method::Delete => {
                    let (query, id) = self.row_query(row, method, true)?;
                    count += tx.delete(table, &query)?.count;
                    ids.push(id);
                }
                Method::Get | Method::Head => {
                    return Err(ApiJsonError::structure(format!("{} is not a write method", method)));
                }
            }
        }
        Ok((ids, count))
    }

    fn is_row_key(&self, key: &str) -> bool {
        key == self.access.row_key || key.strip_suffix(IN_SUFFIX) == Some(self.access.row_key.as_str())
    }

    /// Rows addressed by PUT/DELETE: the row key (`id` or `id{}`) and the
    /// ownership filter. With `filter_rest`, other columns filter too.
    fn row_query(&self, row: &Row, method: Method, filter_rest: bool) -> ApiJsonResult<(TableQuery, Value)> {
        let row_key = &self.access.row_key;
        let mut query = TableQuery::new();
        let mut id = Value::Null;

        for (k, v) in row {
            if k == row_key {
                if v.is_array() || v.is_object() {
                    return Err(ApiJsonError::structure(format!("{}.{} must be a single value", self.key, k)));
                }
                query.add_eq(row_key, v.clone());
                id = v.clone();
            } else if self.is_row_key(k) {
                match v {
                    Value::Array(values) => query.add_in(row_key, values.clone()),
                    _ => return Err(ApiJsonError::structure(format!("{}.{} must be an array", self.key, k))),
                }
                id = v.clone();
            } else if filter_rest {
                if v.is_array() || v.is_object() {
                    return Err(ApiJsonError::structure(format!("{}.{} must be a single value", self.key, k)));
                }
                query.add_eq(k, v.clone());
            }
        }

        let addressed = !id.is_null();
        if let Some((column, owner)) = &self.owner_filter {
            query.add_eq(column, owner.clone());
        } else if !addressed {
            return Err(ApiJsonError::structure(format!(
                "{} {} needs {} or an ownership filter",
                method, self.key, row_key
            )));
        }
        Ok((query, id))
    }

    /// Replace `"k@": "Other/col"` with the value written by an earlier node.
    fn resolve_refs(&self, row: &mut Row, earlier: &[ActionNode]) -> ApiJsonResult<()> {
        let ref_keys: Vec<String> = row.keys().filter(|k| k.len() > 1 && k.ends_with('@')).cloned().collect();

        for key in ref_keys {
            let expr = row.remove(&key).unwrap_or(Value::Null);
            let invalid = |reason: &str| ApiJsonError::InvalidReference {
                path: self.key.clone(),
                reference: expr.to_string(),
                reason: reason.to_string(),
            };
            let (target, column) = expr
                .as_str()
                .and_then(|e| e.rsplit_once('/'))
                .ok_or_else(|| invalid("expected <key>/<column>"))?;
            let target = target.trim_start_matches('/');

            if self.answers_to(target) {
                return Err(ApiJsonError::SelfReference {
                    path: self.key.clone(),
                    reference: expr.to_string(),
                });
            }
            let source = earlier
                .iter()
                .find(|n| n.answers_to(target))
                .ok_or_else(|| ApiJsonError::ReferenceNotFound {
                    path: self.key.clone(),
                    target: target.to_string(),
                })?;
            let value = source
                .rows
                .first()
                .and_then(|r| r.get(column))
                .cloned()
                .ok_or_else(|| invalid("referenced column has no value"))?;

            row.insert(key.trim_end_matches('@').to_string(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::OWNER;
    use crate::executor::{InMemoryStore, TransactionalStore};
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn access() -> Access {
        serde_json::from_value(json!({"name": "t_todo", "alias": "Todo", "owner_column": "userId"})).unwrap()
    }

    fn owner_rule() -> StructureRule {
        serde_json::from_value(json!({"INSERT": {"done": false, "@role": OWNER}, "UPDATE": {"locked": true}})).unwrap()
    }

    #[test]
    fn test_req_update_post_injects_owner_and_defaults() {
        let mut node = ActionNode::new(
            "Todo".into(),
            "Todo".into(),
            access(),
            owner_rule(),
            vec![row(json!({"title": "a", "done": true, "locked": false, "@role": "ADMIN"}))],
        );
        node.req_update(&RequestContext::user("42"), &EngineConfig::default(), Method::Post)
            .unwrap();
        assert_eq!(
            node.rows()[0],
            row(json!({"title": "a", "done": true, "locked": true, "userId": "42"}))
        );
    }

    #[test]
    fn test_owner_requires_user() {
        let mut node = ActionNode::new("Todo".into(), "Todo".into(), access(), owner_rule(), vec![Row::new()]);
        let err = node
            .req_update(&RequestContext::anonymous(), &EngineConfig::default(), Method::Post)
            .unwrap_err();
        assert!(matches!(err, ApiJsonError::Forbidden { .. }));
    }

    #[test]
    fn test_put_without_row_key_or_owner_is_rejected() {
        let store = InMemoryStore::new();
        let ctx = RequestContext::user("1");
        let mut node = ActionNode::new(
            "Todo".into(),
            "Todo".into(),
            access(),
            StructureRule::default(),
            vec![row(json!({"title": "b"}))],
        );
        node.req_update(&ctx, &EngineConfig::default(), Method::Put).unwrap();
        let mut tx = store.begin(&ctx).unwrap();
        let err = node.execute(tx.as_mut(), Method::Put, &[]).unwrap_err();
        assert!(err.to_string().contains("needs id"));
        tx.rollback();
    }

    #[test]
    fn test_uuid_row_keys() {
        let access: Access =
            serde_json::from_value(json!({"name": "Note", "row_key_gen": "uuid"})).unwrap();
        let mut node = ActionNode::new("Note".into(), "Note".into(), access, StructureRule::default(), vec![Row::new()]);
        node.req_update(&RequestContext::anonymous(), &EngineConfig::default(), Method::Post)
            .unwrap();
        let id = node.rows()[0]["id"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
