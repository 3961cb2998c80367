//! Access model: verbs, roles, per-table access rules and the request context.

use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::Row;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Not logged in.
pub const UNKNOWN: &str = "UNKNOWN";
/// Any logged-in user (public resources behind login).
pub const LOGIN: &str = "LOGIN";
/// Rows created by the caller.
pub const OWNER: &str = "OWNER";
/// Administrator.
pub const ADMIN: &str = "ADMIN";

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Verbs served by the read path.
    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ApiJsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(ApiJsonError::structure(format!("unknown method '{}'", other))),
        }
    }
}

/// Caller identity for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub roles: Vec<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Caller that is not logged in.
    pub fn anonymous() -> Self {
        Self {
            roles: vec![UNKNOWN.to_string()],
            user_id: None,
        }
    }

    /// Logged-in caller with the default `LOGIN` and `OWNER` roles.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            roles: vec![LOGIN.to_string(), OWNER.to_string()],
            user_id: Some(user_id.into()),
        }
    }

    pub fn with_roles(user_id: Option<String>, roles: Vec<String>) -> Self {
        Self { roles, user_id }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, allowed: &[String]) -> bool {
        self.roles.iter().any(|r| allowed.contains(r))
    }
}

/// How a table's row key is generated on insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKeyGen {
    /// The store assigns an increasing integer.
    #[default]
    Auto,
    /// The engine assigns a time-ordered UUID.
    Uuid,
}

/// Access rule for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Access {
    /// Physical table name.
    pub name: String,
    /// Name used in requests, when different from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "role_list")]
    pub get: Vec<String>,
    #[serde(default, deserialize_with = "role_list")]
    pub head: Vec<String>,
    #[serde(default, deserialize_with = "role_list")]
    pub post: Vec<String>,
    #[serde(default, deserialize_with = "role_list")]
    pub put: Vec<String>,
    #[serde(default, deserialize_with = "role_list")]
    pub delete: Vec<String>,
    #[serde(default = "default_row_key")]
    pub row_key: String,
    #[serde(default)]
    pub row_key_gen: RowKeyGen,
    /// Column holding the creating user's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_column: Option<String>,
    /// Stamp `created_at` / `updated_at` on writes.
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

fn default_row_key() -> String {
    "id".to_string()
}

impl Access {
    /// Unregistered table: physical name equals the request key, no roles.
    pub fn unregistered(table: &str) -> Self {
        Self {
            name: table.to_string(),
            alias: Some(table.to_string()),
            row_key: default_row_key(),
            ..Default::default()
        }
    }

    /// Key under which requests address this table.
    pub fn key(&self) -> &str {
        self.alias.as_deref().filter(|a| !a.is_empty()).unwrap_or(&self.name)
    }

    pub fn roles_for(&self, method: Method) -> &[String] {
        match method {
            Method::Get => &self.get,
            Method::Head => &self.head,
            Method::Post => &self.post,
            Method::Put => &self.put,
            Method::Delete => &self.delete,
        }
    }

    pub fn owner_column<'a>(&'a self, default: &'a str) -> &'a str {
        self.owner_column.as_deref().unwrap_or(default)
    }
}

/// Role lists are stored either as arrays or as `"A,B"` strings.
fn role_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Roles {
        List(Vec<String>),
        Joined(String),
        Missing,
    }

    Ok(match Roles::deserialize(deserializer)? {
        Roles::List(list) => list,
        Roles::Joined(s) => s
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect(),
        Roles::Missing => Vec::new(),
    })
}

/// Table access lookup.
pub trait AccessPolicy: Send + Sync {
    /// Registered access rule for a request table key, if any.
    fn lookup(&self, table_key: &str) -> Option<Access>;

    /// Access rule for a table key. Unregistered tables are an error when
    /// verification is on, and pass through under their own name otherwise.
    fn get_access(&self, table_key: &str, verify: bool) -> ApiJsonResult<Access> {
        match self.lookup(table_key) {
            Some(access) => Ok(access),
            None if verify => Err(ApiJsonError::AccessNotFound(table_key.to_string())),
            None => Ok(Access::unregistered(table_key)),
        }
    }

    /// Roles allowed to run `method` on the table, plus its physical name.
    fn get_access_role(&self, table_key: &str, method: Method) -> ApiJsonResult<(Vec<String>, String)> {
        let access = self
            .lookup(table_key)
            .ok_or_else(|| ApiJsonError::AccessNotFound(table_key.to_string()))?;
        Ok((access.roles_for(method).to_vec(), access.name))
    }
}

/// Extra row filter contributed per table and caller (row-level security).
///
/// `access` is the rule from the metadata snapshot the request runs against.
pub trait AccessCondition: Send + Sync {
    fn condition(
        &self,
        ctx: &RequestContext,
        access: &Access,
        request: &Row,
        required_roles: &[String],
    ) -> ApiJsonResult<Option<Row>>;
}

impl<F> AccessCondition for F
where
    F: Fn(&RequestContext, &Access, &Row, &[String]) -> ApiJsonResult<Option<Row>> + Send + Sync,
{
    fn condition(
        &self,
        ctx: &RequestContext,
        access: &Access,
        request: &Row,
        required_roles: &[String],
    ) -> ApiJsonResult<Option<Row>> {
        self(ctx, access, request, required_roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_round_trip() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert!("PATCH".parse::<Method>().is_err());
        assert!(Method::Head.is_read());
        assert!(!Method::Put.is_read());
    }

    #[test]
    fn test_access_role_lists() {
        let access: Access = serde_json::from_value(json!({
            "name": "t_todo",
            "alias": "Todo",
            "get": "LOGIN, OWNER",
            "post": ["OWNER"],
        }))
        .unwrap();

        assert_eq!(access.key(), "Todo");
        assert_eq!(access.get, vec!["LOGIN", "OWNER"]);
        assert_eq!(access.roles_for(Method::Post), &["OWNER".to_string()]);
        assert!(access.delete.is_empty());
        assert_eq!(access.row_key, "id");
        assert_eq!(access.row_key_gen, RowKeyGen::Auto);

        let access: Access = serde_json::from_value(json!({"name": "t_note", "get": null})).unwrap();
        assert!(access.get.is_empty());
    }

    #[test]
    fn test_request_context_roles() {
        let anon = RequestContext::anonymous();
        assert!(anon.has_role(UNKNOWN));
        assert!(!anon.has_any_role(&[LOGIN.to_string()]));

        let user = RequestContext::user("7");
        assert_eq!(user.user_id.as_deref(), Some("7"));
        assert!(user.has_any_role(&[ADMIN.to_string(), OWNER.to_string()]));
    }

    struct Fixed(Vec<Access>);

    impl AccessPolicy for Fixed {
        fn lookup(&self, table_key: &str) -> Option<Access> {
            self.0.iter().find(|a| a.key() == table_key).cloned()
        }
    }

    #[test]
    fn test_get_access_fallback() {
        let policy = Fixed(vec![]);
        let access = policy.get_access("User", false).unwrap();
        assert_eq!(access.name, "User");

        let err = policy.get_access("User", true).unwrap_err();
        assert!(matches!(err, ApiJsonError::AccessNotFound(_)));
        assert!(policy.get_access_role("User", Method::Get).is_err());
    }
}
