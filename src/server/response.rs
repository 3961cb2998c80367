use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    Json,
    MsgPack,
}

impl ApiFormat {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some(accept) = headers.get(header::ACCEPT) {
            if let Ok(s) = accept.to_str() {
                if s.contains("application/msgpack") || s.contains("application/x-msgpack") {
                    return ApiFormat::MsgPack;
                }
            }
        }
        ApiFormat::Json
    }
}

/// Successful APIJSON response: `{"code": 200, ...result, "_span": ".."}`
pub struct ApiResponse {
    pub body: Map<String, Value>,
    pub format: ApiFormat,
}

impl ApiResponse {
    pub fn new(result: Value, elapsed: Duration, headers: &HeaderMap) -> Self {
        let mut body = Map::new();
        body.insert("code".to_string(), Value::from(StatusCode::OK.as_u16()));
        match result {
            Value::Object(fields) => body.extend(fields),
            other => {
                body.insert("data".to_string(), other);
            }
        }
        body.insert("_span".to_string(), Value::String(format!("{:?}", elapsed)));

        Self {
            body,
            format: ApiFormat::from_headers(headers),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        match self.format {
            ApiFormat::Json => Json(self.body).into_response(),
            ApiFormat::MsgPack => match rmp_serde::to_vec_named(&self.body) {
                Ok(bytes) => ([(header::CONTENT_TYPE, "application/msgpack")], bytes).into_response(),
                Err(e) => {
                    let err_body = serde_json::json!({
                        "code": 500,
                        "msg": format!("Serialization error: {}", e)
                    });
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(err_body)).into_response()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_format_default_json() {
        let headers = HeaderMap::new();
        assert_eq!(ApiFormat::from_headers(&headers), ApiFormat::Json);
    }

    #[test]
    fn test_api_format_accept_msgpack() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/msgpack".parse().unwrap());
        assert_eq!(ApiFormat::from_headers(&headers), ApiFormat::MsgPack);

        headers.insert(header::ACCEPT, "application/x-msgpack".parse().unwrap());
        assert_eq!(ApiFormat::from_headers(&headers), ApiFormat::MsgPack);
    }

    #[test]
    fn test_envelope_wraps_result() {
        let response = ApiResponse::new(
            json!({"User": {"id": 1}}),
            Duration::from_millis(3),
            &HeaderMap::new(),
        );
        let keys: Vec<&str> = response.body.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["code", "User", "_span"]);
        assert_eq!(response.body["code"], json!(200));
        assert_eq!(response.body["_span"], json!("3ms"));
    }

    #[tokio::test]
    async fn test_msgpack_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/msgpack".parse().unwrap());
        let response = ApiResponse::new(json!({"n": 1}), Duration::ZERO, &headers).into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/msgpack");

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let decoded: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded["n"], json!(1));
        assert_eq!(decoded["code"], json!(200));
    }
}
