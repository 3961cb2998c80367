//! Entry point tying metadata, store, hooks and access conditions together.

use crate::access::{AccessCondition, Method, RequestContext};
use crate::action::{Action, ActionHook, HookRegistry};
use crate::config::EngineConfig;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::executor::TransactionalStore;
use crate::metadata::{Metadata, MetadataRegistry};
use crate::query::Query;
use crate::value::Row;
use serde_json::Value;
use std::sync::Arc;

/// APIJSON engine over one store.
///
/// Cheap to share behind an `Arc`: every request takes its own metadata
/// snapshot, so [`reload_metadata`](ApiJson::reload_metadata) never affects a
/// request already running.
pub struct ApiJson<S> {
    config: EngineConfig,
    registry: MetadataRegistry,
    store: Arc<S>,
    hooks: HookRegistry,
    condition: Option<Arc<dyn AccessCondition>>,
}

impl<S: TransactionalStore + 'static> ApiJson<S> {
    pub fn new(config: EngineConfig, store: Arc<S>) -> Self {
        Self {
            config,
            registry: MetadataRegistry::default(),
            store,
            hooks: HookRegistry::new(),
            condition: None,
        }
    }

    pub fn with_metadata(self, metadata: Metadata) -> Self {
        self.registry.replace(metadata);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ActionHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn with_condition(mut self, condition: Arc<dyn AccessCondition>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metadata(&self) -> Arc<Metadata> {
        self.registry.snapshot()
    }

    /// Swap in new metadata for every later request.
    pub fn reload_metadata(&self, metadata: Metadata) {
        self.registry.replace(metadata);
    }

    pub fn get(&self, ctx: &RequestContext, request: &Row) -> ApiJsonResult<Value> {
        let metadata = self.registry.snapshot();
        Query::new(ctx, &self.config, metadata.as_ref(), self.store.as_ref())
            .with_condition(self.condition.as_deref())
            .result(request)
    }

    pub fn head(&self, ctx: &RequestContext, request: &Row) -> ApiJsonResult<Value> {
        let metadata = self.registry.snapshot();
        Query::new(ctx, &self.config, metadata.as_ref(), self.store.as_ref())
            .with_condition(self.condition.as_deref())
            .count(request)
    }

    pub fn post(&self, ctx: &RequestContext, request: Row) -> ApiJsonResult<Value> {
        self.write(ctx, Method::Post, request)
    }

    pub fn put(&self, ctx: &RequestContext, request: Row) -> ApiJsonResult<Value> {
        self.write(ctx, Method::Put, request)
    }

    pub fn delete(&self, ctx: &RequestContext, request: Row) -> ApiJsonResult<Value> {
        self.write(ctx, Method::Delete, request)
    }

    /// Dispatch on verb.
    pub fn handle(&self, ctx: &RequestContext, method: Method, request: Row) -> ApiJsonResult<Value> {
        match method {
            Method::Get => self.get(ctx, &request),
            Method::Head => self.head(ctx, &request),
            Method::Post | Method::Put | Method::Delete => self.write(ctx, method, request),
        }
    }

    fn write(&self, ctx: &RequestContext, method: Method, request: Row) -> ApiJsonResult<Value> {
        if method.is_read() {
            return Err(ApiJsonError::structure(format!("{} is not a write method", method)));
        }
        let metadata = self.registry.snapshot();
        Action::new(ctx, &self.config, metadata.as_ref(), self.store.as_ref(), &self.hooks, method).result(request)
    }
}
