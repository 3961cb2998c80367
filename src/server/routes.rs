use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::auth_middleware;
use super::handlers::*;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // APIJSON routes
        .route("/get", post(get_json))
        .route("/head", post(head_json))
        .route("/post", post(post_json))
        .route("/put", post(put_json))
        .route("/delete", post(delete_json))
        // Admin routes
        .route("/_api/reload", post(reload_metadata))
        .route("/_api/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
