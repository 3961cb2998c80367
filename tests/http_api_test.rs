//! HTTP API Integration Tests
//!
//! Tests for the HTTP API endpoints including:
//! - Reads, HEAD counts and writes through the APIJSON verbs
//! - Auth (simulated and JWT) and role checks
//! - Error envelopes, msgpack and metadata reload

mod common;

use apijson::metadata::REQUEST_TABLE;
use apijson::server::auth::AuthService;
use apijson::{build_state, create_router, ServerConfig};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{create_seeded_engine, create_test_app, response_json, SECRET};
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

fn api_request(uri: &str, body: &Value, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn bearer(user: &str, roles: Option<Vec<String>>) -> String {
    format!("Bearer {}", AuthService::create_jwt(SECRET, user, roles, 3600).unwrap())
}

// ============================================================================
// Read API Tests
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _tmp) = create_test_app(false);
    let response = app
        .oneshot(Request::builder().uri("/_api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["access"], 3);
    assert_eq!(json["request"], 4);
}

#[tokio::test]
async fn test_get_with_reference() {
    let (app, _tmp) = create_test_app(false);
    let body = json!({"User": {"id": 1}, "Todo[]": {"userId@": "User/id", "@column": "id,title"}});
    let response = app.oneshot(api_request("/get", &body, Some("1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["code"], 200);
    assert_eq!(json["User"]["name"], "Alice");
    assert_eq!(json["Todo[]"], json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]));
    assert!(json["_span"].is_string());
}

#[tokio::test]
async fn test_head_counts() {
    let (app, _tmp) = create_test_app(false);
    let body = json!({"User": {}, "Todo": {"userId": "1"}});
    let response = app.oneshot(api_request("/head", &body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["User"]["count"], 2);
    assert_eq!(json["Todo"]["count"], 2);
}

#[tokio::test]
async fn test_msgpack_response() {
    let (app, _tmp) = create_test_app(false);
    let mut request = api_request("/get", &json!({"User": {"id": 2}}), None);
    request
        .headers_mut()
        .insert(header::ACCEPT, "application/msgpack".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/msgpack");
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let decoded: Value = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(decoded["User"]["name"], "Bob");
}

// ============================================================================
// Error Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_bodies() {
    let (app, _tmp) = create_test_app(false);

    let response = app
        .clone()
        .oneshot(api_request("/get", &json!([1, 2]), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = response_json(response).await;
    assert_eq!(json["code"], 400);
    assert!(json["msg"].as_str().unwrap().contains("an array"));

    let request = Request::builder()
        .method("POST")
        .uri("/get")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_errors_are_400() {
    let (app, _tmp) = create_test_app(false);

    let body = json!({"User": {"id@": "User/id"}});
    let response = app.clone().oneshot(api_request("/get", &body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json!({"Todo": {"id@": "Nope/id"}});
    let response = app.clone().oneshot(api_request("/get", &body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json!({"User": {"name": "x"}});
    let response = app.oneshot(api_request("/post", &body, Some("1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["msg"], "Tag missing");
}

#[tokio::test]
async fn test_rollback_reports_nodes() {
    let (engine, _tmp) = create_seeded_engine();
    // User gets id 3, the Credential with that id already exists
    engine
        .import("Credential", "id", vec![json!({"id": 3, "pwdHash": "x"})])
        .unwrap();
    let state = build_state(&ServerConfig::default(), engine).unwrap();
    let storage = state.storage().clone();
    let app = create_router(state);

    let body = json!({
        "tag": "register",
        "User": {"name": "Carol"},
        "Credential": {"id@": "User/id", "pwdHash": "h"}
    });
    let response = app.oneshot(api_request("/post", &body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = response_json(response).await;
    assert_eq!(json["nodes"]["User"]["status"], "rolled_back");
    assert_eq!(json["nodes"]["Credential"]["status"], "failed");
    assert_eq!(storage.rows("User").unwrap().len(), 2);
}

// ============================================================================
// Write API Tests
// ============================================================================

#[tokio::test]
async fn test_post_put_delete_todo() {
    let (app, _tmp) = create_test_app(false);

    let body = json!({"tag": "Todo", "Todo": {"title": "new"}});
    let response = app.clone().oneshot(api_request("/post", &body, Some("2"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["Todo"], json!({"code": 200, "count": 1, "id": 4}));

    let body = json!({"Todo": {"id": 4}});
    let json = response_json(app.clone().oneshot(api_request("/get", &body, Some("2"))).await.unwrap()).await;
    assert_eq!(json["Todo"]["userId"], "2");
    assert!(json["Todo"]["created_at"].is_string());

    // user 1 does not own todo 4
    let body = json!({"tag": "Todo", "Todo": {"id": 4, "title": "stolen"}});
    let json = response_json(app.clone().oneshot(api_request("/put", &body, Some("1"))).await.unwrap()).await;
    assert_eq!(json["Todo"]["count"], 0);

    let body = json!({"tag": "Todo", "Todo": {"id": 4}});
    let json = response_json(app.clone().oneshot(api_request("/delete", &body, Some("2"))).await.unwrap()).await;
    assert_eq!(json["Todo"]["count"], 1);

    let body = json!({"Todo": {"id": 4}});
    let json = response_json(app.oneshot(api_request("/get", &body, None)).await.unwrap()).await;
    assert_eq!(json["Todo"], Value::Null);
}

#[tokio::test]
async fn test_reload_picks_up_new_templates() {
    let (engine, _tmp) = create_seeded_engine();
    let state = build_state(&ServerConfig::default(), engine).unwrap();
    let storage = state.storage().clone();
    let app = create_router(state);

    let body = json!({"tag": "signup", "User": {"name": "Dan"}});
    let response = app.clone().oneshot(api_request("/post", &body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    storage
        .import(
            REQUEST_TABLE,
            "id",
            vec![json!({"method": "POST", "tag": "signup", "structure": {"User": {"MUST": "name"}}})],
        )
        .unwrap();
    let response = app
        .clone()
        .oneshot(api_request("/_api/reload", &json!({}), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["request"], 5);

    let response = app.oneshot(api_request("/post", &body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(storage.rows("User").unwrap().len(), 3);
}

// ============================================================================
// Auth Tests
// ============================================================================

#[tokio::test]
async fn test_verified_reads_are_filtered_by_owner() {
    let (app, _tmp) = create_test_app(true);
    let body = json!({"Todo[]": {}});

    // anonymous callers may not read todos at all
    let json = response_json(app.clone().oneshot(api_request("/get", &body, None)).await.unwrap()).await;
    assert_eq!(json["Todo[]"], json!([]));

    let auth = bearer("1", None);
    let json = response_json(app.clone().oneshot(api_request("/get", &body, Some(&auth))).await.unwrap()).await;
    assert_eq!(json["Todo[]"].as_array().unwrap().len(), 2);

    let admin = bearer("root", Some(vec!["ADMIN".to_string()]));
    let json = response_json(app.oneshot(api_request("/get", &body, Some(&admin))).await.unwrap()).await;
    assert_eq!(json["Todo[]"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_verified_writes_need_roles() {
    let (app, _tmp) = create_test_app(true);
    let body = json!({"tag": "Todo", "Todo": {"id": 1, "title": "x"}});

    let response = app.clone().oneshot(api_request("/put", &body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response_json(response).await["code"], 403);

    let auth = bearer("1", None);
    let response = app.oneshot(api_request("/put", &body, Some(&auth))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_token_is_401() {
    let (app, _tmp) = create_test_app(true);
    let response = app
        .clone()
        .oneshot(api_request("/get", &json!({"User": {}}), Some("Bearer not-a-jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // reload is admin-only once roles are verified
    let auth = bearer("1", None);
    let response = app
        .oneshot(api_request("/_api/reload", &json!({}), Some(&auth)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
