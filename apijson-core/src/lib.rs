//! APIJSON Core - storage-independent declarative query and mutation engine.
//!
//! A client sends a JSON document naming the tables, filters and cross-table
//! references it wants. The engine compiles it into single-table queries,
//! runs them in dependency order against a [`TableExecutor`] and stitches the
//! rows back into a document shaped like the request. It never emits a
//! multi-table join: relationships are resolved by feeding key sets from one
//! query into the next and matching rows in memory.
//!
//! Writes go through tagged request templates and run in a fixed execution
//! order inside one transaction, with hooks before and after.
//!
//! # Example
//!
//! ```rust
//! use apijson_core::{ApiJson, EngineConfig, InMemoryStore, Metadata, RequestContext};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.insert_rows("User", vec![json!({"id": 1, "name": "Alice"})]);
//! store.insert_rows("Todo", vec![json!({"id": 10, "userId": 1, "title": "write docs"})]);
//!
//! let engine = ApiJson::new(EngineConfig::default(), store).with_metadata(Metadata::default());
//! let request = json!({
//!     "User": {"id": 1},
//!     "Todo[]": {"userId@": "User/id"}
//! });
//! let out = engine
//!     .get(&RequestContext::anonymous(), request.as_object().unwrap())
//!     .unwrap();
//! assert_eq!(out["Todo[]"][0]["title"], "write docs");
//! ```

pub mod access;
pub mod action;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod query;
pub mod value;

// Re-export main types for convenience
pub use access::{Access, AccessCondition, AccessPolicy, Method, RequestContext, RowKeyGen};
pub use action::{Action, ActionHook, ActionNode, HookRegistry, NodeOutcome};
pub use condition::{Filter, OrderBy, TableQuery};
pub use config::EngineConfig;
pub use engine::ApiJson;
pub use error::{ApiJsonError, ApiJsonResult, ErrorKind, NodeAbort};
pub use executor::{InMemoryStore, RecordedCall, TableExecutor, TransactionalStore, WriteOutcome, WriteTransaction};
pub use metadata::{Metadata, MetadataRegistry, RequestRow, RequestTemplate, StructureRule};
pub use query::Query;
pub use value::{NodeResult, Row};
