//! Common test utilities for the server tests
//!
//! Provides shared helper functions for:
//! - Creating RocksDB stores in temp directories
//! - Seeding access rules, request templates and rows
//! - Building the router

#![allow(dead_code)]

use apijson::metadata::{seed_store, Seed};
use apijson::{build_state, create_router, ServerConfig, StorageEngine};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";

pub fn create_test_engine() -> (StorageEngine, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = StorageEngine::new(tmp_dir.path()).expect("Failed to create storage engine");
    (engine, tmp_dir)
}

pub fn seed() -> Seed {
    serde_json::from_value(json!({
        "access": [
            {"name": "User", "get": "UNKNOWN,LOGIN,ADMIN", "head": "UNKNOWN,LOGIN,ADMIN", "post": "UNKNOWN,LOGIN"},
            {"name": "Credential", "post": "UNKNOWN,LOGIN"},
            {
                "name": "t_todo",
                "alias": "Todo",
                "get": "OWNER,ADMIN",
                "head": "OWNER,ADMIN",
                "post": "LOGIN",
                "put": "OWNER",
                "delete": "OWNER",
                "owner_column": "userId",
                "timestamps": true
            }
        ],
        "request": [
            {
                "method": "POST",
                "tag": "register",
                "structure": {
                    "User": {"MUST": "name", "REFUSE": "id"},
                    "Credential": {"MUST": "pwdHash"}
                },
                "exec_queue": "User,Credential"
            },
            {
                "method": "POST",
                "tag": "Todo",
                "structure": {"MUST": "title", "REFUSE": "id,userId", "INSERT": {"@role": "OWNER"}}
            },
            {
                "method": "PUT",
                "tag": "Todo",
                "structure": {"MUST": "id", "REFUSE": "userId", "UPDATE": {"@role": "OWNER"}}
            },
            {
                "method": "DELETE",
                "tag": "Todo",
                "structure": {"MUST": "id", "REFUSE": "!", "UPDATE": {"@role": "OWNER"}}
            }
        ],
        "data": {
            "User": [
                {"id": 1, "name": "Alice"},
                {"id": 2, "name": "Bob"}
            ],
            "Todo": [
                {"id": 1, "userId": "1", "title": "a"},
                {"id": 2, "userId": "1", "title": "b"},
                {"id": 3, "userId": "2", "title": "c"}
            ]
        }
    }))
    .expect("valid seed")
}

pub fn create_seeded_engine() -> (StorageEngine, TempDir) {
    let (engine, tmp) = create_test_engine();
    seed_store(&engine, seed()).expect("Failed to seed");
    (engine, tmp)
}

/// Router over a seeded store. `verify` turns on role checks and JWT auth.
pub fn create_test_app(verify: bool) -> (axum::Router, TempDir) {
    let (engine, tmp) = create_seeded_engine();
    let mut config = ServerConfig::default();
    config.engine.access_verify = verify;
    if verify {
        config.auth.jwt_secret = Some(SECRET.to_string());
    }
    let state = build_state(&config, engine).expect("Failed to build state");
    (create_router(state), tmp)
}

// Helper to parse JSON response
pub async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}
