use super::node::{CONTAINER_KEY, LIST_SUFFIX, REF_SUFFIX};
use super::Query;
use crate::access::Method;
use crate::condition::TableQuery;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::Row;
use serde_json::{json, Map, Value};

impl Query<'_> {
    /// HEAD: `{"count": n}` for every top-level table object.
    ///
    /// Counts ignore paging. A table the caller may not read counts 0.
    pub fn count(mut self, request: &Row) -> ApiJsonResult<Value> {
        self.method = Method::Head;
        let mut out = Map::new();

        for (key, value) in request {
            let Value::Object(conditions) = value else {
                continue;
            };
            if key == CONTAINER_KEY {
                return Err(ApiJsonError::structure("HEAD counts tables, not containers"));
            }
            if let Some(k) = conditions.keys().find(|k| k.ends_with(REF_SUFFIX)) {
                return Err(ApiJsonError::InvalidCondition(format!(
                    "references are not supported in HEAD ({}.{})",
                    key, k
                )));
            }

            let table = key.strip_suffix(LIST_SUFFIX).unwrap_or(key);
            let access = self.policy.get_access(table, self.config.access_verify)?;
            let required = access.roles_for(Method::Head).to_vec();

            let count = if self.config.access_verify && !self.ctx.has_any_role(&required) {
                tracing::debug!(table = %table, "HEAD not allowed, counting 0");
                0
            } else {
                let mut query = TableQuery::new();
                query.parse_condition(conditions)?;
                if let Some(condition) = self.condition {
                    if let Some(extra) = condition.condition(self.ctx, &access, conditions, &required)? {
                        query.parse_condition(&extra)?;
                    }
                }
                query.unpaginated();
                self.executor.total(self.ctx, &access.name, &query)?
            };

            out.insert(key.clone(), json!({ "count": count }));
        }

        Ok(Value::Object(out))
    }
}
