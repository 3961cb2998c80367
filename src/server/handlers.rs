use apijson_core::{access::ADMIN, ApiJson, Method, RequestContext};
use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::HeaderMap,
    response::Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use super::response::ApiResponse;
use crate::error::{DbError, DbResult};
use crate::metadata;
use crate::storage::StorageEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ApiJson<StorageEngine>>,
    pub jwt_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn storage(&self) -> &Arc<StorageEngine> {
        self.engine.store()
    }
}

// ==================== APIJSON Handlers ====================

pub async fn get_json(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    dispatch(state, ctx, Method::Get, headers, body).await
}

pub async fn head_json(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    dispatch(state, ctx, Method::Head, headers, body).await
}

pub async fn post_json(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    dispatch(state, ctx, Method::Post, headers, body).await
}

pub async fn put_json(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    dispatch(state, ctx, Method::Put, headers, body).await
}

pub async fn delete_json(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    dispatch(state, ctx, Method::Delete, headers, body).await
}

async fn dispatch(
    state: AppState,
    ctx: RequestContext,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> DbResult<ApiResponse> {
    let start = Instant::now();
    let request = metadata::object_rows(serde_json::from_slice(&body)?)?;

    // Store access is blocking RocksDB I/O
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.handle(&ctx, method, request))
        .await
        .map_err(|e| DbError::InternalError(format!("Task error: {}", e)))??;

    let elapsed = start.elapsed();
    tracing::debug!(%method, ?elapsed, "request served");
    Ok(ApiResponse::new(result, elapsed, &headers))
}

// ==================== Admin Handlers ====================

/// Re-read `_access` and `_request` and swap them in.
pub async fn reload_metadata(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> DbResult<Json<Value>> {
    if state.engine.config().access_verify && !ctx.has_role(ADMIN) {
        return Err(DbError::Forbidden("reload requires the ADMIN role".to_string()));
    }

    let storage = state.storage().clone();
    let loaded = tokio::task::spawn_blocking(move || metadata::load(&storage))
        .await
        .map_err(|e| DbError::InternalError(format!("Task error: {}", e)))??;

    let tables = loaded.access_rules().count();
    let requests = loaded.request_count();
    state.engine.reload_metadata(loaded);

    Ok(Json(json!({
        "code": 200,
        "access": tables,
        "request": requests,
    })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let metadata = state.engine.metadata();
    Json(json!({
        "code": 200,
        "status": "ok",
        "access": metadata.access_rules().count(),
        "request": metadata.request_count(),
    }))
}
