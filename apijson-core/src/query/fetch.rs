use super::node::{NodeId, NodeKind, RefEdge};
use super::Query;
use crate::value::NodeResult;
use serde_json::Value;

impl Query<'_> {
    /// Execute table and reference nodes in dependency order.
    ///
    /// The first node that fails keeps its error and stops the walk; the
    /// error surfaces during assembly.
    pub(super) fn fetch(&mut self) {
        let order = std::mem::take(&mut self.order);
        for &id in &order {
            if !self.nodes[id].finished {
                match self.nodes[id].kind {
                    NodeKind::Table { .. } => self.fetch_table(id),
                    NodeKind::Reference { .. } => self.fetch_reference(id),
                    _ => {}
                }
            }
            if let Some(err) = &self.nodes[id].error {
                tracing::debug!(path = %self.nodes[id].path, error = %err, "node failed, stopping");
                break;
            }
        }
        self.order = order;
    }

    fn upstream_error(&mut self, id: NodeId) -> bool {
        let failed = self
            .dependencies(id)
            .into_iter()
            .find_map(|d| self.nodes[d].error.clone());
        match failed {
            Some(err) => {
                self.nodes[id].fail(err);
                true
            }
            None => false,
        }
    }

    fn fetch_table(&mut self, id: NodeId) {
        if self.upstream_error(id) {
            return;
        }

        let node = &self.nodes[id];
        tracing::debug!(path = %node.path, primary = node.is_primary, "node fetch");

        let Some(mut query) = node.query.clone() else {
            self.nodes[id].short_circuit();
            return;
        };

        for edge in &node.refs {
            let target = &self.nodes[edge.target];
            let empty = NodeResult::empty(target.is_list);
            let result = target.result.as_ref().unwrap_or(&empty);

            if target.is_list {
                let values = result.distinct_column(&edge.column);
                if values.is_empty() {
                    tracing::debug!(path = %node.path, upstream = %target.path, "upstream empty, skipping query");
                    self.nodes[id].short_circuit();
                    return;
                }
                query.add_in(&edge.local, values);
            } else {
                match single_value(result, edge) {
                    Some(value) => query.add_eq(&edge.local, value),
                    None => {
                        tracing::debug!(path = %node.path, upstream = %target.path, "upstream empty, skipping query");
                        self.nodes[id].short_circuit();
                        return;
                    }
                }
            }
        }

        let table = match (&node.physical, &node.kind) {
            (Some(physical), _) => physical.clone(),
            (None, NodeKind::Table { table }) => table.clone(),
            (None, _) => return,
        };
        let wants_total = node.is_list && node.is_primary;

        let rows = match self.executor.fetch(self.ctx, &table, &query) {
            Ok(rows) => rows,
            Err(e) => {
                self.nodes[id].fail(e);
                return;
            }
        };
        let total = if wants_total {
            match self.executor.total(self.ctx, &table, &query) {
                Ok(total) => Some(total),
                Err(e) => {
                    self.nodes[id].fail(e);
                    return;
                }
            }
        } else {
            None
        };

        let node = &mut self.nodes[id];
        node.result = Some(NodeResult::from_rows(rows, node.is_list));
        node.total = total;
        node.query = Some(query);
        node.finished = true;
    }

    fn fetch_reference(&mut self, id: NodeId) {
        if self.upstream_error(id) {
            return;
        }

        let node = &self.nodes[id];
        let (NodeKind::Reference { expr }, Some(edge)) = (&node.kind, node.refs.first()) else {
            return;
        };

        let value = if self.reads_total(edge.target, &edge.column, expr) {
            Value::from(self.total_of(edge.target))
        } else {
            let target = &self.nodes[edge.target];
            match &target.result {
                Some(result) if target.is_list => Value::Array(
                    result
                        .rows()
                        .iter()
                        .filter_map(|row| row.get(&edge.column).cloned())
                        .collect(),
                ),
                Some(result) => single_value(result, edge).unwrap_or(Value::Null),
                None if target.is_list => Value::Array(Vec::new()),
                None => Value::Null,
            }
        };

        tracing::debug!(path = %node.path, "reference resolved");
        let node = &mut self.nodes[id];
        node.result = Some(NodeResult::Scalar(value));
        node.finished = true;
    }

    /// Unpaginated row count of a list table, or of a container's primary table.
    fn total_of(&self, target: NodeId) -> u64 {
        let node = &self.nodes[target];
        let table = if node.is_container() {
            node.children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].is_table() && self.nodes[c].is_primary)
        } else {
            Some(target)
        };

        table
            .map(|t| {
                let table = &self.nodes[t];
                table
                    .total
                    .unwrap_or_else(|| table.result.as_ref().map_or(0, |r| r.len() as u64))
            })
            .unwrap_or(0)
    }
}

/// Non-null value of the referenced column on a singular result.
fn single_value(result: &NodeResult, edge: &RefEdge) -> Option<Value> {
    result
        .rows()
        .first()
        .and_then(|row| row.get(&edge.column))
        .filter(|v| !v.is_null())
        .cloned()
}
