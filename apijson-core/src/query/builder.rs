use super::node::{depth_of, parse_table_key, Node, NodeId, NodeKind, REF_SUFFIX};
use super::{Query, ROOT};
use crate::condition::{KEY_COUNT, KEY_PAGE};
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::Row;
use serde_json::Value;

impl Query<'_> {
    /// Build the node tree and the path registry. No I/O.
    pub(super) fn build(&mut self, request: &Row) -> ApiJsonResult<()> {
        self.nodes.clear();
        self.path_nodes.clear();
        self.nodes.push(Node::new("", String::new(), NodeKind::Root, false, None));
        self.build_children(ROOT, request)
    }

    fn build_children(&mut self, parent: NodeId, request: &Row) -> ApiJsonResult<()> {
        let parent_kind = self.nodes[parent].kind.clone();

        for (key, value) in request {
            if let Value::Object(child) = value {
                self.add_object(parent, key, child)?;
                continue;
            }

            match parent_kind {
                NodeKind::Table { .. } => match key.strip_suffix(REF_SUFFIX) {
                    Some(local) => {
                        let expr = self.reference_expr(parent, key, local, value)?;
                        self.nodes[parent].ref_keys.push((local.to_string(), expr));
                    }
                    None => {
                        self.nodes[parent].request.insert(key.clone(), value.clone());
                    }
                },
                NodeKind::Container if key == KEY_PAGE || key == KEY_COUNT => {
                    self.nodes[parent].request.insert(key.clone(), value.clone());
                }
                _ => match key.strip_suffix(REF_SUFFIX) {
                    Some(local) => {
                        let expr = self.reference_expr(parent, key, local, value)?;
                        self.add_node(parent, key, NodeKind::Reference { expr }, false)?;
                    }
                    None => {
                        self.add_node(parent, key, NodeKind::Scalar(value.clone()), false)?;
                    }
                },
            }
        }
        Ok(())
    }

    fn add_object(&mut self, parent: NodeId, key: &str, request: &Row) -> ApiJsonResult<()> {
        if key.ends_with(REF_SUFFIX) {
            return Err(ApiJsonError::InvalidReference {
                path: self.child_path(parent, key),
                reference: key.to_string(),
                reason: "reference value must be a path string".to_string(),
            });
        }

        let parent_node = &self.nodes[parent];
        if parent_node.is_table() && parent_node.is_list {
            return Err(ApiJsonError::NestedListTable(parent_node.path.clone()));
        }

        let path = self.child_path(parent, key);
        let id = match parse_table_key(key, &path) {
            None => self.add_node(parent, key, NodeKind::Container, true)?,
            Some((table, is_list)) => self.add_node(parent, key, NodeKind::Table { table }, is_list)?,
        };
        self.build_children(id, request)
    }

    fn add_node(&mut self, parent: NodeId, key: &str, kind: NodeKind, is_list: bool) -> ApiJsonResult<NodeId> {
        let path = self.child_path(parent, key);
        if depth_of(&path) > self.config.max_depth {
            return Err(ApiJsonError::DepthExceeded {
                path,
                max: self.config.max_depth,
            });
        }

        tracing::debug!(path = %path, "node new");

        let id = self.nodes.len();
        self.path_nodes.insert(path.clone(), id);
        self.nodes.push(Node::new(key, path, kind, is_list, Some(parent)));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    fn reference_expr(&self, parent: NodeId, key: &str, local: &str, value: &Value) -> ApiJsonResult<String> {
        let invalid = |reason: &str| ApiJsonError::InvalidReference {
            path: self.child_path(parent, key),
            reference: value.to_string(),
            reason: reason.to_string(),
        };
        if local.is_empty() {
            return Err(invalid("empty reference key"));
        }
        match value {
            Value::String(expr) => Ok(expr.clone()),
            _ => Err(invalid("reference value must be a path string")),
        }
    }

    fn child_path(&self, parent: NodeId, key: &str) -> String {
        let parent_path = &self.nodes[parent].path;
        if parent_path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", parent_path, key)
        }
    }
}
