//! Query tree nodes and key/path parsing.

use crate::condition::TableQuery;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::{NodeResult, Row};
use serde_json::Value;

/// Index of a node in the query arena.
pub type NodeId = usize;

/// Key of an anonymous grouping container.
pub const CONTAINER_KEY: &str = "[]";
/// Suffix of list table keys.
pub const LIST_SUFFIX: &str = "[]";
/// Suffix of reference keys.
pub const REF_SUFFIX: &str = "@";
/// Column name that reads a collection's unpaginated row count.
pub const TOTAL_COLUMN: &str = "total";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The request document itself.
    Root,
    /// `[]`: groups tables that are joined and paged together.
    Container,
    /// One storage table, addressed by its request key.
    Table { table: String },
    /// `"k@": "path/column"` outside a table object.
    Reference { expr: String },
    /// A plain value echoed back.
    Scalar(Value),
}

/// A reference resolved to its target node.
#[derive(Debug, Clone, PartialEq)]
pub struct RefEdge {
    /// Column of this node that receives the value (without `@`).
    pub local: String,
    pub target: NodeId,
    /// Column read off the target.
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub key: String,
    pub path: String,
    pub kind: NodeKind,
    pub is_list: bool,
    pub is_primary: bool,
    pub parent: Option<NodeId>,
    /// Children in request order.
    pub children: Vec<NodeId>,
    /// Plain conditions of a table, or `page`/`count` of a container.
    pub request: Row,
    /// Unresolved references: local key to raw path expression.
    pub ref_keys: Vec<(String, String)>,
    pub refs: Vec<RefEdge>,
    /// Physical table name, once access is resolved.
    pub physical: Option<String>,
    /// Conditions handed to the executor. `None` means nothing is queried.
    pub query: Option<TableQuery>,
    /// Cleared when the caller's roles do not allow reading the table.
    pub readable: bool,
    pub result: Option<NodeResult>,
    pub total: Option<u64>,
    pub error: Option<ApiJsonError>,
    pub finished: bool,
}

impl Node {
    pub fn new(key: &str, path: String, kind: NodeKind, is_list: bool, parent: Option<NodeId>) -> Self {
        Self {
            key: key.to_string(),
            path,
            kind,
            is_list,
            is_primary: false,
            parent,
            children: Vec::new(),
            request: Row::new(),
            ref_keys: Vec::new(),
            refs: Vec::new(),
            physical: None,
            query: None,
            readable: true,
            result: None,
            total: None,
            error: None,
            finished: false,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, NodeKind::Table { .. })
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container)
    }

    /// Key under which the node appears in the response.
    pub fn output_key(&self) -> &str {
        self.key.strip_suffix(REF_SUFFIX).unwrap_or(&self.key)
    }

    /// Finish without querying, holding an empty result.
    pub fn short_circuit(&mut self) {
        self.result = Some(NodeResult::empty(self.is_list));
        self.finished = true;
    }

    pub fn fail(&mut self, err: ApiJsonError) {
        self.error = Some(err);
        self.finished = true;
    }
}

/// Classify a key holding an object.
///
/// Returns the table name and list-ness; `None` for the container key.
pub fn parse_table_key(key: &str, path: &str) -> Option<(String, bool)> {
    if key == CONTAINER_KEY {
        return None;
    }
    if let Some(table) = key.strip_suffix(LIST_SUFFIX) {
        return Some((table.to_string(), true));
    }
    let under_list = path.split('/').any(|segment| segment.contains(LIST_SUFFIX));
    Some((key.to_string(), under_list))
}

/// Parent directory of a path, `""` for top-level nodes.
pub fn dir_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Split a reference expression into (target path, column).
///
/// `"Todo/userId"` is absolute; `"/Todo/userId"` is relative to the
/// directory of `own_path`.
pub fn split_ref_path(own_path: &str, expr: &str) -> ApiJsonResult<(String, String)> {
    let invalid = |reason: &str| ApiJsonError::InvalidReference {
        path: own_path.to_string(),
        reference: expr.to_string(),
        reason: reason.to_string(),
    };

    let (target, column) = expr
        .rsplit_once('/')
        .ok_or_else(|| invalid("expected <path>/<column>"))?;
    if column.is_empty() {
        return Err(invalid("empty column"));
    }

    let target = match target.strip_prefix('/') {
        Some(relative) => {
            let dir = dir_of(own_path);
            if dir.is_empty() {
                relative.to_string()
            } else {
                format!("{}/{}", dir, relative)
            }
        }
        None => target.to_string(),
    };
    if target.is_empty() {
        return Err(invalid("empty target path"));
    }

    Ok((target, column.to_string()))
}

/// Number of segments in a path.
pub fn depth_of(path: &str) -> usize {
    path.split('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_key() {
        assert_eq!(parse_table_key("[]", ""), None);
        assert_eq!(parse_table_key("Todo[]", ""), Some(("Todo".to_string(), true)));
        assert_eq!(parse_table_key("User", "User"), Some(("User".to_string(), false)));
        assert_eq!(parse_table_key("User", "[]/User"), Some(("User".to_string(), true)));
    }

    #[test]
    fn test_split_ref_path() {
        assert_eq!(
            split_ref_path("Todo", "User/id").unwrap(),
            ("User".to_string(), "id".to_string())
        );
        assert_eq!(
            split_ref_path("[]/User", "/Todo/userId").unwrap(),
            ("[]/Todo".to_string(), "userId".to_string())
        );
        assert_eq!(
            split_ref_path("User", "/Todo/userId").unwrap(),
            ("Todo".to_string(), "userId".to_string())
        );
        assert_eq!(
            split_ref_path("total@", "[]/total").unwrap(),
            ("[]".to_string(), "total".to_string())
        );
        assert!(split_ref_path("User", "id").is_err());
        assert!(split_ref_path("User", "Todo/").is_err());
        assert!(split_ref_path("User", "/id").is_err());
    }

    #[test]
    fn test_dir_and_depth() {
        assert_eq!(dir_of("[]/User"), "[]");
        assert_eq!(dir_of("User"), "");
        assert_eq!(depth_of("[]/[]/User"), 3);
    }
}
