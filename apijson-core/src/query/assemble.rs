use super::node::{NodeId, NodeKind, RefEdge};
use super::Query;
use crate::error::ApiJsonResult;
use crate::value::{loose_eq, NodeResult, Row};
use serde_json::{Map, Value};
use std::collections::HashMap;

impl Query<'_> {
    /// Build the response value of a node and everything below it.
    pub(super) fn assemble(&self, id: NodeId) -> ApiJsonResult<Value> {
        let node = &self.nodes[id];
        if let Some(err) = &node.error {
            return Err(err.clone());
        }

        match &node.kind {
            NodeKind::Root => Ok(Value::Object(self.assemble_children(id)?)),
            NodeKind::Scalar(value) => Ok(value.clone()),
            NodeKind::Reference { .. } => Ok(node
                .result
                .clone()
                .map(NodeResult::into_value)
                .unwrap_or(Value::Null)),
            NodeKind::Table { .. } => {
                let children = self.assemble_children(id)?;
                let value = node
                    .result
                    .clone()
                    .unwrap_or_else(|| NodeResult::empty(node.is_list))
                    .into_value();
                match value {
                    Value::Object(mut row) => {
                        row.extend(children);
                        Ok(Value::Object(row))
                    }
                    other => Ok(other),
                }
            }
            NodeKind::Container => self.assemble_container(id),
        }
    }

    fn assemble_children(&self, id: NodeId) -> ApiJsonResult<Map<String, Value>> {
        let mut out = Map::new();
        for &child in &self.nodes[id].children {
            let value = self.assemble(child)?;
            out.insert(self.nodes[child].output_key().to_string(), value);
        }
        Ok(out)
    }

    /// In-memory join: one item per primary row, each non-primary table
    /// contributing the first row that matches the rows already attached.
    fn assemble_container(&self, id: NodeId) -> ApiJsonResult<Value> {
        let container = &self.nodes[id];
        tracing::debug!(path = %container.path, "container assemble");

        let mut primary = None;
        let mut siblings = Vec::new();
        let mut shared = Vec::new();
        for &child in &container.children {
            let node = &self.nodes[child];
            if node.is_table() {
                if let Some(err) = &node.error {
                    return Err(err.clone());
                }
                if node.is_primary {
                    primary = Some(child);
                } else {
                    siblings.push(child);
                }
            } else {
                shared.push((node.output_key().to_string(), self.assemble(child)?));
            }
        }

        let Some(primary) = primary else {
            return Ok(Value::Array(Vec::new()));
        };

        // Targets before dependents, so every join column is attached first.
        let position: HashMap<NodeId, usize> = self.order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        siblings.sort_by_key(|s| position.get(s).copied().unwrap_or(usize::MAX));

        let primary_node = &self.nodes[primary];
        let primary_rows = primary_node.result.as_ref().map(NodeResult::rows).unwrap_or(&[]);

        let mut items = Vec::with_capacity(primary_rows.len());
        for primary_row in primary_rows {
            let mut attached: HashMap<NodeId, &Row> = HashMap::new();
            attached.insert(primary, primary_row);

            let mut item = Map::new();
            item.insert(primary_node.output_key().to_string(), Value::Object(primary_row.clone()));

            for &sibling in &siblings {
                let node = &self.nodes[sibling];
                let joins: Vec<&RefEdge> = node
                    .refs
                    .iter()
                    .filter(|e| self.nodes[e.target].parent == Some(id))
                    .collect();
                let rows = node.result.as_ref().map(NodeResult::rows).unwrap_or(&[]);

                if let Some(row) = rows.iter().find(|row| joins_match(row, &joins, &attached)) {
                    attached.insert(sibling, row);
                    item.insert(node.output_key().to_string(), Value::Object(row.clone()));
                }
            }

            for (key, value) in &shared {
                item.insert(key.clone(), value.clone());
            }
            items.push(Value::Object(item));
        }

        Ok(Value::Array(items))
    }
}

fn joins_match(row: &Row, joins: &[&RefEdge], attached: &HashMap<NodeId, &Row>) -> bool {
    !joins.is_empty()
        && joins.iter().all(|edge| {
            let expected = attached.get(&edge.target).and_then(|t| t.get(&edge.column));
            match (row.get(&edge.local), expected) {
                (Some(actual), Some(expected)) => loose_eq(actual, expected),
                _ => false,
            }
        })
}
