//! Error types for apijson-core.
//!
//! Storage-agnostic errors (no axum, no rocksdb). Every variant carries owned
//! strings so an error can be recorded on the node that produced it and still
//! be returned from the top of the tree walk.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structurally invalid request; always aborts the whole request.
    RequestMalformed,
    /// Caller lacks a required role.
    AuthorizationDenied,
    /// A reference names a node that does not exist.
    ReferenceUnresolved,
    /// The single-table executor or the store failed.
    ExecutorFailure,
    /// A registered hook refused the request.
    HookRejected,
}

/// Final state of one queued write node when a transaction did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NodeAbort {
    /// The node's mutation was applied and then undone.
    RolledBack,
    /// The node's mutation itself failed.
    Failed { msg: String },
    /// The node was never executed.
    Skipped,
}

/// APIJSON engine error type
#[derive(Error, Debug, Clone)]
pub enum ApiJsonError {
    #[error("Depth exceeded: '{path}' is deeper than {max}")]
    DepthExceeded { path: String, max: usize },

    #[error("Node '{path}' cannot reference itself ({reference})")]
    SelfReference { path: String, reference: String },

    #[error("Container '{0}' must have a primary table")]
    MissingPrimaryTable(String),

    #[error("Container '{path}' has more than one primary table: {tables}")]
    MultiplePrimaryTables { path: String, tables: String },

    #[error("Referenced node '{target}' not found (from '{path}')")]
    ReferenceNotFound { path: String, target: String },

    #[error("Cyclic reference through '{0}'")]
    CyclicReference(String),

    #[error("Invalid reference '{reference}' at '{path}': {reason}")]
    InvalidReference {
        path: String,
        reference: String,
        reason: String,
    },

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("List table '{0}' cannot nest objects, use a [] container")]
    NestedListTable(String),

    #[error("Tag missing")]
    TagMissing,

    #[error("Tag not found: {0}")]
    TagNotFound(String),

    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Access not found: {0}")]
    AccessNotFound(String),

    #[error("Forbidden: {method} {table}")]
    Forbidden { method: String, table: String },

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Hook '{hook}' rejected: {message}")]
    Hook { hook: String, message: String },

    #[error("Transaction rolled back at '{node}': {reason}")]
    TransactionRolledBack {
        node: String,
        reason: String,
        outcomes: Vec<(String, NodeAbort)>,
    },
}

/// Result type for APIJSON operations
pub type ApiJsonResult<T> = Result<T, ApiJsonError>;

impl ApiJsonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiJsonError::DepthExceeded { .. }
            | ApiJsonError::SelfReference { .. }
            | ApiJsonError::MissingPrimaryTable(_)
            | ApiJsonError::MultiplePrimaryTables { .. }
            | ApiJsonError::CyclicReference(_)
            | ApiJsonError::InvalidReference { .. }
            | ApiJsonError::InvalidCondition(_)
            | ApiJsonError::NestedListTable(_)
            | ApiJsonError::TagMissing
            | ApiJsonError::TagNotFound(_)
            | ApiJsonError::Structure(_)
            | ApiJsonError::AccessNotFound(_) => ErrorKind::RequestMalformed,
            ApiJsonError::Forbidden { .. } => ErrorKind::AuthorizationDenied,
            ApiJsonError::ReferenceNotFound { .. } => ErrorKind::ReferenceUnresolved,
            ApiJsonError::Executor(_) | ApiJsonError::TransactionRolledBack { .. } => {
                ErrorKind::ExecutorFailure
            }
            ApiJsonError::Hook { .. } => ErrorKind::HookRejected,
        }
    }

    pub(crate) fn structure(msg: impl Into<String>) -> Self {
        ApiJsonError::Structure(msg.into())
    }
}

impl Serialize for ApiJsonError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiJsonError::DepthExceeded {
            path: "[]/[]/[]/[]/[]/User".to_string(),
            max: 5,
        };
        assert_eq!(err.to_string(), "Depth exceeded: '[]/[]/[]/[]/[]/User' is deeper than 5");

        let err = ApiJsonError::MissingPrimaryTable("[]".to_string());
        assert_eq!(err.to_string(), "Container '[]' must have a primary table");

        let err = ApiJsonError::Forbidden {
            method: "POST".to_string(),
            table: "Todo".to_string(),
        };
        assert_eq!(err.to_string(), "Forbidden: POST Todo");

        let err = ApiJsonError::Executor("disk full".to_string());
        assert_eq!(err.to_string(), "Executor error: disk full");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ApiJsonError::SelfReference {
                path: "User".to_string(),
                reference: "User/id".to_string()
            }
            .kind(),
            ErrorKind::RequestMalformed
        );
        assert_eq!(
            ApiJsonError::ReferenceNotFound {
                path: "User".to_string(),
                target: "Todo".to_string()
            }
            .kind(),
            ErrorKind::ReferenceUnresolved
        );
        assert_eq!(
            ApiJsonError::Forbidden {
                method: "GET".to_string(),
                table: "User".to_string()
            }
            .kind(),
            ErrorKind::AuthorizationDenied
        );
        assert_eq!(
            ApiJsonError::Executor("boom".to_string()).kind(),
            ErrorKind::ExecutorFailure
        );
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = ApiJsonError::TagMissing;
        assert_eq!(serde_json::to_value(&err).unwrap(), serde_json::json!("Tag missing"));
    }

    #[test]
    fn test_node_abort_serialization() {
        let failed = NodeAbort::Failed {
            msg: "duplicate key".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"status": "failed", "msg": "duplicate key"})
        );
        assert_eq!(
            serde_json::to_value(NodeAbort::RolledBack).unwrap(),
            serde_json::json!({"status": "rolled_back"})
        );
    }
}
