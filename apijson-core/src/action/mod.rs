//! Write path: validates a tagged request against its template and runs one
//! mutation per top-level key, in the template's execution order, inside a
//! single transaction.
//!
//! Order of work for a request:
//!
//! 1. `tag`/`version` select the template; structure and roles are checked.
//! 2. every hook's `before_exec` runs for every node, in queue order;
//! 3. each node's rows are rewritten (`INSERT`, `UPDATE`, ownership);
//! 4. all mutations run in one transaction, any failure rolls back all;
//! 5. every hook's `after_exec` runs, in queue order.

mod hook;
mod node;
mod structure;

pub use hook::{ActionHook, HookRegistry};
pub use node::{ActionNode, NodeOutcome};

use crate::access::{AccessPolicy, Method, RequestContext};
use crate::config::EngineConfig;
use crate::error::{ApiJsonError, ApiJsonResult, NodeAbort};
use crate::executor::TransactionalStore;
use crate::metadata::{Metadata, RequestTemplate};
use crate::value::Row;
use serde_json::{Map, Value};

pub const KEY_TAG: &str = "tag";
pub const KEY_VERSION: &str = "version";

/// One write request in flight.
pub struct Action<'a> {
    ctx: &'a RequestContext,
    config: &'a EngineConfig,
    metadata: &'a Metadata,
    store: &'a dyn TransactionalStore,
    hooks: &'a HookRegistry,
    method: Method,
}

impl<'a> Action<'a> {
    pub fn new(
        ctx: &'a RequestContext,
        config: &'a EngineConfig,
        metadata: &'a Metadata,
        store: &'a dyn TransactionalStore,
        hooks: &'a HookRegistry,
        method: Method,
    ) -> Self {
        Self {
            ctx,
            config,
            metadata,
            store,
            hooks,
            method,
        }
    }

    /// Run the request; the response maps each request key to its outcome.
    pub fn result(self, mut request: Row) -> ApiJsonResult<Value> {
        if self.method.is_read() {
            return Err(ApiJsonError::structure(format!("{} is not a write method", self.method)));
        }

        let tag = match request.remove(KEY_TAG) {
            Some(Value::String(tag)) => tag,
            Some(other) => return Err(ApiJsonError::structure(format!("tag must be a string, got {}", other))),
            None => return Err(ApiJsonError::TagMissing),
        };
        let version = request.remove(KEY_VERSION);
        let template = self.metadata.get_request(self.method, &tag, version.as_ref())?;
        tracing::debug!(method = %self.method, tag = %tag, version = template.version, "action");

        let mut queue = self.parse(template, request)?;

        for node in queue.iter_mut() {
            self.hooks.before_exec(self.ctx, node, self.method)?;
        }
        for node in queue.iter_mut() {
            node.req_update(self.ctx, self.config, self.method)?;
        }

        self.execute(&mut queue)?;

        for node in &queue {
            self.hooks.after_exec(self.ctx, node, self.method)?;
        }

        let mut out = Map::new();
        for node in &queue {
            let outcome = node.outcome().cloned().map(serde_json::to_value).transpose();
            let outcome = outcome.map_err(|e| ApiJsonError::Executor(e.to_string()))?;
            out.insert(node.key().to_string(), outcome.unwrap_or(Value::Null));
        }
        tracing::info!(method = %self.method, tag = %tag, nodes = queue.len(), "action committed");
        Ok(Value::Object(out))
    }

    /// Validate the request and build the nodes in execution order.
    fn parse(&self, template: &RequestTemplate, mut request: Row) -> ApiJsonResult<Vec<ActionNode>> {
        let matched = structure::match_structure(template, &request)?;

        let mut nodes = Vec::with_capacity(matched.len());
        for (key, structure_key) in matched {
            let table_key = structure_key.strip_suffix("[]").unwrap_or(&structure_key);
            let access = self.metadata.get_access(table_key, self.config.access_verify)?;
            if self.config.access_verify && !self.ctx.has_any_role(access.roles_for(self.method)) {
                tracing::debug!(table = %table_key, roles = ?self.ctx.roles, "write not allowed");
                return Err(ApiJsonError::Forbidden {
                    method: self.method.to_string(),
                    table: key,
                });
            }

            let Some((_, rule)) = template.rule_for(&key) else {
                return Err(ApiJsonError::structure(format!("{} is not declared", key)));
            };
            let value = request.remove(&key).unwrap_or(Value::Null);
            let rows = structure::rows_of(&key, value)?;
            for row in &rows {
                rule.check(&key, row)?;
            }
            nodes.push(ActionNode::new(key, structure_key, access, rule.clone(), rows));
        }

        let mut queue = Vec::with_capacity(nodes.len());
        for name in &template.exec_queue {
            if let Some(pos) = nodes.iter().position(|n| n.structure_key() == name) {
                queue.push(nodes.swap_remove(pos));
            }
        }
        Ok(queue)
    }

    /// Run every node in one transaction. On failure nothing is kept and the
    /// error lists what happened to each node.
    fn execute(&self, queue: &mut [ActionNode]) -> ApiJsonResult<()> {
        let mut tx = self.store.begin(self.ctx)?;

        for i in 0..queue.len() {
            let (done, rest) = queue.split_at_mut(i);
            let node = &mut rest[0];
            if let Err(e) = node.execute(tx.as_mut(), self.method, done) {
                tx.rollback();
                tracing::info!(node = %node.key(), error = %e, "action rolled back");

                let outcomes = queue
                    .iter()
                    .enumerate()
                    .map(|(j, n)| {
                        let status = match j.cmp(&i) {
                            std::cmp::Ordering::Less => NodeAbort::RolledBack,
                            std::cmp::Ordering::Equal => NodeAbort::Failed { msg: e.to_string() },
                            std::cmp::Ordering::Greater => NodeAbort::Skipped,
                        };
                        (n.key().to_string(), status)
                    })
                    .collect();
                return Err(ApiJsonError::TransactionRolledBack {
                    node: queue[i].key().to_string(),
                    reason: e.to_string(),
                    outcomes,
                });
            }
        }

        if let Err(e) = tx.commit() {
            let outcomes = queue
                .iter()
                .map(|n| (n.key().to_string(), NodeAbort::RolledBack))
                .collect();
            return Err(ApiJsonError::TransactionRolledBack {
                node: "commit".to_string(),
                reason: e.to_string(),
                outcomes,
            });
        }
        Ok(())
    }
}
