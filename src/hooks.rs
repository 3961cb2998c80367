//! Built-in write hooks.

use apijson_core::{ActionHook, ActionNode, ApiJsonResult, Method, RequestContext};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Logs every committed write node.
#[derive(Debug, Default)]
pub struct AuditHook;

impl ActionHook for AuditHook {
    fn name(&self) -> &str {
        "audit"
    }

    fn after_exec(&self, ctx: &RequestContext, node: &ActionNode, method: Method) -> ApiJsonResult<()> {
        let (count, id) = node
            .outcome()
            .map(|o| (o.count, o.id.clone().unwrap_or(Value::Null)))
            .unwrap_or((0, Value::Null));
        tracing::info!(
            target: "apijson::audit",
            user = ctx.user_id.as_deref().unwrap_or("-"),
            %method,
            table = %node.access().name,
            count,
            %id,
            "write"
        );
        Ok(())
    }
}

/// Stamps `created_at`/`updated_at` (RFC 3339) on tables whose access rule
/// has `timestamps = true`.
#[derive(Debug)]
pub struct TimestampHook {
    clock: fn() -> DateTime<Utc>,
}

impl Default for TimestampHook {
    fn default() -> Self {
        Self { clock: Utc::now }
    }
}

impl TimestampHook {
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }
}

impl ActionHook for TimestampHook {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn before_exec(&self, _ctx: &RequestContext, node: &mut ActionNode, method: Method) -> ApiJsonResult<()> {
        if !node.access().timestamps {
            return Ok(());
        }
        let now = Value::String((self.clock)().to_rfc3339());
        for row in node.rows_mut() {
            match method {
                Method::Post => {
                    row.entry(CREATED_AT.to_string()).or_insert_with(|| now.clone());
                    row.insert(UPDATED_AT.to_string(), now.clone());
                }
                Method::Put => {
                    row.insert(UPDATED_AT.to_string(), now.clone());
                }
                Method::Get | Method::Head | Method::Delete => {}
            }
        }
        Ok(())
    }
}
