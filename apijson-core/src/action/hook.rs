//! Write-path hooks, run once per queued node around the transaction.

use super::node::ActionNode;
use crate::access::{Method, RequestContext};
use crate::error::{ApiJsonError, ApiJsonResult};
use std::sync::Arc;

/// Callbacks around node execution. Returning an error aborts the request.
///
/// `before_exec` runs for every node before any request rewrite or write;
/// it may edit the node's rows. `after_exec` runs once the transaction has
/// committed.
pub trait ActionHook: Send + Sync {
    fn name(&self) -> &str;

    /// Request table keys this hook cares about; `None` means all of them.
    fn tables(&self) -> Option<&[String]> {
        None
    }

    fn before_exec(&self, _ctx: &RequestContext, _node: &mut ActionNode, _method: Method) -> ApiJsonResult<()> {
        Ok(())
    }

    fn after_exec(&self, _ctx: &RequestContext, _node: &ActionNode, _method: Method) -> ApiJsonResult<()> {
        Ok(())
    }
}

/// Registered hooks, in registration order.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ActionHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ActionHook>) {
        tracing::debug!(hook = hook.name(), "hook registered");
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn applicable<'a>(&'a self, node: &'a ActionNode) -> impl Iterator<Item = &'a Arc<dyn ActionHook>> + 'a {
        self.hooks.iter().filter(move |h| match h.tables() {
            None => true,
            Some(tables) => tables.iter().any(|t| t == node.table_key()),
        })
    }

    pub(crate) fn before_exec(&self, ctx: &RequestContext, node: &mut ActionNode, method: Method) -> ApiJsonResult<()> {
        let hooks: Vec<_> = self.applicable(node).cloned().collect();
        for hook in hooks {
            hook.before_exec(ctx, node, method).map_err(|e| rejected(hook.as_ref(), e))?;
        }
        Ok(())
    }

    pub(crate) fn after_exec(&self, ctx: &RequestContext, node: &ActionNode, method: Method) -> ApiJsonResult<()> {
        for hook in self.applicable(node) {
            hook.after_exec(ctx, node, method).map_err(|e| rejected(hook.as_ref(), e))?;
        }
        Ok(())
    }
}

fn rejected(hook: &dyn ActionHook, err: ApiJsonError) -> ApiJsonError {
    match err {
        ApiJsonError::Hook { .. } => err,
        other => ApiJsonError::Hook {
            hook: hook.name().to_string(),
            message: other.to_string(),
        },
    }
}
