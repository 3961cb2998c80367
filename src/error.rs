use apijson_core::{ApiJsonError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{0}")]
    Engine(#[from] ApiJsonError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn status(&self) -> StatusCode {
        match self {
            DbError::Engine(e) => match e.kind() {
                ErrorKind::RequestMalformed | ErrorKind::ReferenceUnresolved => StatusCode::BAD_REQUEST,
                ErrorKind::AuthorizationDenied => StatusCode::FORBIDDEN,
                ErrorKind::ExecutorFailure | ErrorKind::HookRejected => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DbError::BadRequest(_) | DbError::JsonError(_) => StatusCode::BAD_REQUEST,
            DbError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DbError::Forbidden(_) => StatusCode::FORBIDDEN,
            DbError::ConfigError(_) | DbError::IoError(_) | DbError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rocksdb::Error> for DbError {
    fn from(err: rocksdb::Error) -> Self {
        DbError::InternalError(err.into())
    }
}

/// Storage failures surface in the engine as executor errors.
impl From<DbError> for ApiJsonError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Engine(e) => e,
            other => ApiJsonError::Executor(other.to_string()),
        }
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let mut body = serde_json::json!({
            "code": status.as_u16(),
            "msg": self.to_string(),
        });
        if let DbError::Engine(ApiJsonError::TransactionRolledBack { outcomes, .. }) = &self {
            let nodes: serde_json::Map<String, serde_json::Value> = outcomes
                .iter()
                .map(|(key, abort)| (key.clone(), serde_json::to_value(abort).unwrap_or_default()))
                .collect();
            body["nodes"] = serde_json::Value::Object(nodes);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apijson_core::NodeAbort;

    #[test]
    fn test_error_messages() {
        let err = DbError::BadRequest("body must be a JSON object".to_string());
        assert_eq!(err.to_string(), "Bad Request: body must be a JSON object");

        let err = DbError::from(ApiJsonError::TagMissing);
        assert_eq!(err.to_string(), "Tag missing");
    }

    #[test]
    fn test_engine_error_status() {
        let err = DbError::from(ApiJsonError::MissingPrimaryTable("[]".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = DbError::from(ApiJsonError::Forbidden {
            method: "PUT".to_string(),
            table: "Todo".to_string(),
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = DbError::from(ApiJsonError::Executor("disk full".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(DbError::Unauthorized("bad token".into()).status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_storage_error_becomes_executor_error() {
        let err: ApiJsonError = DbError::InternalError("write failed".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::ExecutorFailure);

        let err: ApiJsonError = DbError::Engine(ApiJsonError::TagMissing).into();
        assert!(matches!(err, ApiJsonError::TagMissing));
    }

    #[tokio::test]
    async fn test_rollback_body_lists_nodes() {
        let err = DbError::from(ApiJsonError::TransactionRolledBack {
            node: "Credential".to_string(),
            reason: "duplicate key".to_string(),
            outcomes: vec![
                ("User".to_string(), NodeAbort::RolledBack),
                (
                    "Credential".to_string(),
                    NodeAbort::Failed {
                        msg: "duplicate key".to_string(),
                    },
                ),
            ],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 500);
        assert_eq!(json["nodes"]["User"]["status"], "rolled_back");
        assert_eq!(json["nodes"]["Credential"]["status"], "failed");
    }
}
