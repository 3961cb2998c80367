//! Read path: compiles a request document into single-table queries and
//! stitches their rows back into a document shaped like the request.
//!
//! A request goes through four phases, each a separate `impl Query` block:
//!
//! 1. `builder`: one [`Node`] per key, registered by path.
//! 2. `resolve`: access checks, conditions, references and primary election.
//! 3. `fetch`: dependency-ordered single-table queries.
//! 4. `assemble`: bottom-up response building with the in-memory join.
//!
//! HEAD requests skip the tree and count each top-level table ([`Query::count`]).
//!
//! No query runs before phases 1 and 2 have accepted the whole request.

mod assemble;
mod builder;
mod fetch;
mod head;
pub mod node;
mod resolve;

pub use node::{Node, NodeId, NodeKind, RefEdge};

use crate::access::{AccessCondition, AccessPolicy, Method, RequestContext};
use crate::config::EngineConfig;
use crate::error::ApiJsonResult;
use crate::executor::TableExecutor;
use crate::value::Row;
use serde_json::Value;
use std::collections::HashMap;

/// Arena index of the root node.
pub const ROOT: NodeId = 0;

/// One read request in flight.
pub struct Query<'a> {
    ctx: &'a RequestContext,
    config: &'a EngineConfig,
    policy: &'a dyn AccessPolicy,
    condition: Option<&'a dyn AccessCondition>,
    executor: &'a dyn TableExecutor,
    method: Method,
    nodes: Vec<Node>,
    /// Every node by path, filled while building.
    path_nodes: HashMap<String, NodeId>,
    /// Table and reference nodes in execution order.
    order: Vec<NodeId>,
}

impl<'a> Query<'a> {
    pub fn new(
        ctx: &'a RequestContext,
        config: &'a EngineConfig,
        policy: &'a dyn AccessPolicy,
        executor: &'a dyn TableExecutor,
    ) -> Self {
        Self {
            ctx,
            config,
            policy,
            condition: None,
            executor,
            method: Method::Get,
            nodes: Vec::new(),
            path_nodes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Option<&'a dyn AccessCondition>) -> Self {
        self.condition = condition;
        self
    }

    /// Run the request and return the response document.
    pub fn result(mut self, request: &Row) -> ApiJsonResult<Value> {
        self.build(request)?;
        self.resolve()?;
        self.fetch();
        self.assemble(ROOT)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_by_path(&self, path: &str) -> Option<&Node> {
        self.path_nodes.get(path).map(|&id| &self.nodes[id])
    }
}
