//! Row-level read filter for tables readable by their owners.

use apijson_core::{access::OWNER, Access, AccessCondition, ApiJsonError, ApiJsonResult, RequestContext, Row};
use serde_json::Value;

/// Limits reads to the caller's own rows when the caller qualifies for a
/// table only through the `OWNER` role.
///
/// The owner column comes from the access rule of the request's own metadata
/// snapshot, so a reload never pairs old rules with new columns.
#[derive(Debug, Clone)]
pub struct OwnerCondition {
    default_column: String,
}

impl OwnerCondition {
    pub fn new(default_column: impl Into<String>) -> Self {
        Self {
            default_column: default_column.into(),
        }
    }
}

impl AccessCondition for OwnerCondition {
    fn condition(
        &self,
        ctx: &RequestContext,
        access: &Access,
        _request: &Row,
        required_roles: &[String],
    ) -> ApiJsonResult<Option<Row>> {
        let owner_only = required_roles.iter().any(|r| r == OWNER)
            && ctx.has_role(OWNER)
            && !required_roles.iter().any(|r| r != OWNER && ctx.has_role(r));
        if !owner_only {
            return Ok(None);
        }

        let user_id = ctx.user_id.clone().ok_or_else(|| ApiJsonError::Forbidden {
            method: "GET".to_string(),
            table: access.key().to_string(),
        })?;
        let mut filter = Row::new();
        filter.insert(
            access.owner_column(&self.default_column).to_string(),
            Value::String(user_id),
        );
        Ok(Some(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| r.to_string()).collect()
    }

    fn access(v: serde_json::Value) -> Access {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_owner_only_access_filters_by_owner_column() {
        let condition = OwnerCondition::new("user_id");
        let ctx = RequestContext::user("42");
        let todo = access(json!({"name": "t_todo", "alias": "Todo", "owner_column": "userId"}));

        let filter = condition
            .condition(&ctx, &todo, &Row::new(), &roles(&["OWNER", "ADMIN"]))
            .unwrap();
        assert_eq!(filter, json!({"userId": "42"}).as_object().cloned());

        let note = access(json!({"name": "t_note"}));
        let filter = condition
            .condition(&ctx, &note, &Row::new(), &roles(&["OWNER"]))
            .unwrap();
        assert_eq!(filter, json!({"user_id": "42"}).as_object().cloned());
    }

    #[test]
    fn test_broader_roles_see_everything() {
        let condition = OwnerCondition::new("user_id");
        let todo = access(json!({"name": "t_todo", "owner_column": "userId"}));
        let ctx = RequestContext::user("42");
        let filter = condition
            .condition(&ctx, &todo, &Row::new(), &roles(&["LOGIN", "OWNER"]))
            .unwrap();
        assert!(filter.is_none());

        let filter = condition
            .condition(&RequestContext::anonymous(), &todo, &Row::new(), &roles(&["UNKNOWN"]))
            .unwrap();
        assert!(filter.is_none());
    }

    #[test]
    fn test_owner_role_without_user_id() {
        let condition = OwnerCondition::new("user_id");
        let ctx = RequestContext::with_roles(None, roles(&["OWNER"]));
        let todo = access(json!({"name": "t_todo"}));
        let err = condition.condition(&ctx, &todo, &Row::new(), &roles(&["OWNER"])).unwrap_err();
        assert!(matches!(err, ApiJsonError::Forbidden { .. }));
    }
}
