pub mod auth;
pub mod handlers;
pub mod response;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;

use apijson_core::ApiJson;
use std::sync::Arc;

use crate::access::OwnerCondition;
use crate::config::ServerConfig;
use crate::error::DbResult;
use crate::hooks::{AuditHook, TimestampHook};
use crate::metadata;
use crate::storage::StorageEngine;

/// Load metadata from `storage` and wire the engine with the built-in hooks
/// and the owner read filter.
pub fn build_state(config: &ServerConfig, storage: StorageEngine) -> DbResult<AppState> {
    let loaded = metadata::load(&storage)?;
    let owner = Arc::new(OwnerCondition::new(config.engine.owner_column.clone()));

    let engine = ApiJson::new(config.engine.clone(), Arc::new(storage))
        .with_metadata(loaded)
        .with_hook(Arc::new(TimestampHook::default()))
        .with_hook(Arc::new(AuditHook))
        .with_condition(owner);

    Ok(AppState {
        engine: Arc::new(engine),
        jwt_secret: config.auth.jwt_secret.as_deref().map(Arc::from),
    })
}
