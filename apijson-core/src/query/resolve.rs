use super::node::{split_ref_path, NodeId, NodeKind, RefEdge, TOTAL_COLUMN};
use super::{Query, ROOT};
use crate::condition::{TableQuery, KEY_COUNT, KEY_PAGE};
use crate::error::{ApiJsonError, ApiJsonResult};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    Visiting,
    Done,
}

impl Query<'_> {
    /// Resolve access, conditions and references, elect primary tables and
    /// fix the execution order. Fails before any query runs.
    pub(super) fn resolve(&mut self) -> ApiJsonResult<()> {
        for id in 0..self.nodes.len() {
            match self.nodes[id].kind {
                NodeKind::Table { .. } => self.resolve_table(id)?,
                NodeKind::Reference { .. } => self.resolve_reference(id)?,
                _ => {}
            }
        }

        for id in 0..self.nodes.len() {
            if self.nodes[id].is_table() {
                let parent = self.nodes[id].parent;
                let has_ref_brother = self.nodes[id]
                    .refs
                    .iter()
                    .any(|r| self.nodes[r.target].parent == parent);
                self.nodes[id].is_primary = !has_ref_brother;
            }
        }

        for id in 0..self.nodes.len() {
            match self.nodes[id].kind {
                NodeKind::Container => self.elect_primary(id)?,
                NodeKind::Table { .. } => self.standalone_window(id)?,
                _ => {}
            }
        }

        self.order = self.execution_order()?;
        Ok(())
    }

    fn resolve_table(&mut self, id: NodeId) -> ApiJsonResult<()> {
        let NodeKind::Table { table } = &self.nodes[id].kind else {
            return Ok(());
        };
        let path = self.nodes[id].path.clone();
        tracing::debug!(path = %path, "node parse");

        let access = self.policy.get_access(table, self.config.access_verify)?;
        let required = access.roles_for(self.method).to_vec();
        let readable = !self.config.access_verify || self.ctx.has_any_role(&required);
        if !readable {
            tracing::debug!(path = %path, roles = ?self.ctx.roles, required = ?required, "node not readable");
        }

        let mut query = TableQuery::new();
        query.parse_condition(&self.nodes[id].request)?;
        query.cap_count(self.config.max_count);

        let mut refs = Vec::with_capacity(self.nodes[id].ref_keys.len());
        for (local, expr) in &self.nodes[id].ref_keys {
            let (target, column) = self.lookup_target(&path, expr)?;
            if !self.nodes[target].is_table() {
                return Err(ApiJsonError::InvalidReference {
                    path: path.clone(),
                    reference: expr.clone(),
                    reason: "table conditions can only reference tables".to_string(),
                });
            }
            refs.push(RefEdge {
                local: local.clone(),
                target,
                column,
            });
        }

        let mut failure = None;
        if readable {
            if let Some(condition) = self.condition {
                match condition.condition(self.ctx, &access, &self.nodes[id].request, &required) {
                    Ok(Some(extra)) => {
                        if let Err(e) = query.parse_condition(&extra) {
                            failure = Some(e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => failure = Some(e),
                }
            }
        }

        let node = &mut self.nodes[id];
        node.refs = refs;
        node.physical = Some(access.name);
        node.readable = readable;
        node.query = readable.then_some(query);
        if let Some(err) = failure {
            node.fail(err);
        }
        Ok(())
    }

    fn resolve_reference(&mut self, id: NodeId) -> ApiJsonResult<()> {
        let NodeKind::Reference { expr } = &self.nodes[id].kind else {
            return Ok(());
        };
        let expr = expr.clone();
        let path = self.nodes[id].path.clone();
        let (target, column) = self.lookup_target(&path, &expr)?;

        let target_node = &self.nodes[target];
        let is_list = match target_node.kind {
            NodeKind::Table { .. } => target_node.is_list && !self.reads_total(target, &column, &expr),
            NodeKind::Container if column == TOTAL_COLUMN => false,
            _ => {
                return Err(ApiJsonError::InvalidReference {
                    path,
                    reference: expr,
                    reason: "target must be a table, or a container read through 'total'".to_string(),
                })
            }
        };

        let node = &mut self.nodes[id];
        node.is_list = is_list;
        node.refs = vec![RefEdge {
            local: node.output_key().to_string(),
            target,
            column,
        }];
        Ok(())
    }

    /// Whether a reference reads a collection's total instead of a column.
    pub(super) fn reads_total(&self, target: NodeId, column: &str, expr: &str) -> bool {
        column == TOTAL_COLUMN
            && match self.nodes[target].kind {
                NodeKind::Container => true,
                NodeKind::Table { .. } => self.nodes[target].is_list && expr.ends_with("[]/total"),
                _ => false,
            }
    }

    fn lookup_target(&self, own_path: &str, expr: &str) -> ApiJsonResult<(NodeId, String)> {
        let (target_path, column) = split_ref_path(own_path, expr)?;
        if target_path == own_path {
            return Err(ApiJsonError::SelfReference {
                path: own_path.to_string(),
                reference: expr.to_string(),
            });
        }
        let target = *self
            .path_nodes
            .get(&target_path)
            .ok_or_else(|| ApiJsonError::ReferenceNotFound {
                path: own_path.to_string(),
                target: target_path.clone(),
            })?;
        Ok((target, column))
    }

    /// A container hands its page window to its single primary table and
    /// lifts paging from every other table.
    fn elect_primary(&mut self, id: NodeId) -> ApiJsonResult<()> {
        let container = &self.nodes[id];
        let tables: Vec<NodeId> = container
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].is_table())
            .collect();
        let primaries: Vec<NodeId> = tables.iter().copied().filter(|&c| self.nodes[c].is_primary).collect();

        let primary = match primaries.as_slice() {
            [] => return Err(ApiJsonError::MissingPrimaryTable(container.path.clone())),
            [one] => *one,
            many => {
                return Err(ApiJsonError::MultiplePrimaryTables {
                    path: container.path.clone(),
                    tables: many
                        .iter()
                        .map(|&c| self.nodes[c].key.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        };

        let (page, count) = self.requested_window(id)?;
        tracing::debug!(path = %container.path, primary = %self.nodes[primary].key, page, count, "primary elected");

        for table in tables {
            if let Some(query) = self.nodes[table].query.as_mut() {
                if table == primary {
                    query.set_window(page, count);
                } else {
                    query.unpaginated();
                }
            }
        }
        Ok(())
    }

    /// Paging of tables outside containers: lists default to the configured
    /// window, singular tables read one row. A list filtered by a sibling's
    /// keys is not paged, like a non-primary container child.
    fn standalone_window(&mut self, id: NodeId) -> ApiJsonResult<()> {
        let in_container = self.nodes[id]
            .parent
            .is_some_and(|p| self.nodes[p].is_container());
        if in_container {
            return Ok(());
        }
        if self.nodes[id].is_list && !self.nodes[id].is_primary {
            if let Some(query) = self.nodes[id].query.as_mut() {
                query.unpaginated();
            }
            return Ok(());
        }

        let window = if self.nodes[id].is_list {
            Some(self.requested_window(id)?)
        } else {
            None
        };
        if let Some(query) = self.nodes[id].query.as_mut() {
            match window {
                Some((page, count)) => query.set_window(page, count),
                None => {
                    let page = query.page().max(1);
                    query.set_window(page, 1);
                }
            }
        }
        Ok(())
    }

    /// `page`/`count` sent on a node, with configured defaults and cap.
    fn requested_window(&self, id: NodeId) -> ApiJsonResult<(u64, u64)> {
        let request = &self.nodes[id].request;
        let mut window = TableQuery::new();
        let mut paging = request.clone();
        paging.retain(|k, _| k == KEY_PAGE || k == KEY_COUNT);
        window.parse_condition(&paging)?;

        let page = if request.contains_key(KEY_PAGE) {
            window.page()
        } else {
            self.config.default_page
        };
        // `count: 0` from a client gets the largest page allowed
        let count = if !request.contains_key(KEY_COUNT) {
            self.config.default_count
        } else if window.count() == 0 {
            self.config.max_count
        } else {
            window.count()
        };
        window.set_window(page, count);
        window.cap_count(self.config.max_count);
        Ok((window.page(), window.count()))
    }

    /// Depth-first topological order over table and reference nodes.
    fn execution_order(&self) -> ApiJsonResult<Vec<NodeId>> {
        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut order = Vec::new();
        for id in ROOT..self.nodes.len() {
            if matches!(self.nodes[id].kind, NodeKind::Table { .. } | NodeKind::Reference { .. }) {
                self.visit(id, &mut marks, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit(&self, id: NodeId, marks: &mut [Mark], order: &mut Vec<NodeId>) -> ApiJsonResult<()> {
        match marks[id] {
            Mark::Done => return Ok(()),
            Mark::Visiting => return Err(ApiJsonError::CyclicReference(self.nodes[id].path.clone())),
            Mark::New => {}
        }
        marks[id] = Mark::Visiting;
        for dep in self.dependencies(id) {
            self.visit(dep, marks, order)?;
        }
        marks[id] = Mark::Done;
        order.push(id);
        Ok(())
    }

    /// Nodes that must finish before `id` runs. A container stands for its tables.
    pub(super) fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps = Vec::new();
        for edge in &self.nodes[id].refs {
            let target = &self.nodes[edge.target];
            if target.is_container() {
                deps.extend(target.children.iter().copied().filter(|&c| self.nodes[c].is_table()));
            } else {
                deps.push(edge.target);
            }
        }
        deps
    }
}
