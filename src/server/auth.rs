use apijson_core::{
    access::{LOGIN, OWNER},
    RequestContext,
};
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::handlers::AppState;
use crate::error::DbError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: usize,  // expiration
    /// Roles granted to the caller; `LOGIN, OWNER` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl Claims {
    pub fn into_context(self) -> RequestContext {
        let roles = self
            .roles
            .unwrap_or_else(|| vec![LOGIN.to_string(), OWNER.to_string()]);
        RequestContext::with_roles(Some(self.sub), roles)
    }
}

pub struct AuthService;

impl AuthService {
    /// Issue an HS256 token valid for `ttl_secs`.
    pub fn create_jwt(
        secret: &str,
        user_id: &str,
        roles: Option<Vec<String>>,
        ttl_secs: u64,
    ) -> Result<String, DbError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DbError::InternalError(e.to_string()))?
            .as_secs();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl_secs) as usize,
            roles,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| DbError::InternalError(format!("Token creation failed: {}", e)))
    }

    pub fn validate_token(secret: &str, token: &str) -> Result<Claims, DbError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| DbError::Unauthorized("Invalid token".to_string()))?;

        Ok(token_data.claims)
    }

    /// Caller identity from an `Authorization` header value.
    ///
    /// With a secret the header must be a valid `Bearer` JWT. Without one the
    /// header value is taken as the user id.
    pub fn context_from_header(secret: Option<&str>, header: Option<&str>) -> Result<RequestContext, DbError> {
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(RequestContext::anonymous());
        };

        match secret {
            Some(secret) => {
                let token = header
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| DbError::Unauthorized("Expected a Bearer token".to_string()))?;
                Ok(Self::validate_token(secret, token.trim())?.into_context())
            }
            None => {
                let user_id = header.strip_prefix("Bearer ").unwrap_or(header).trim();
                Ok(RequestContext::user(user_id))
            }
        }
    }
}

/// Resolve the caller and attach a [`RequestContext`] to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, DbError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let ctx = AuthService::context_from_header(state.jwt_secret.as_deref(), header)?;
    tracing::debug!(user = ?ctx.user_id, roles = ?ctx.roles, "caller");
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apijson_core::access::{ADMIN, UNKNOWN};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_no_header_is_anonymous() {
        let ctx = AuthService::context_from_header(Some(SECRET), None).unwrap();
        assert_eq!(ctx.roles, vec![UNKNOWN]);
        assert!(ctx.user_id.is_none());
    }

    #[test]
    fn test_simulated_auth() {
        let ctx = AuthService::context_from_header(None, Some("42")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("42"));
        assert!(ctx.has_role(OWNER));

        let ctx = AuthService::context_from_header(None, Some("Bearer 7")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_jwt_roundtrip_with_roles() {
        let token = AuthService::create_jwt(SECRET, "alice", Some(vec![ADMIN.to_string()]), 3600).unwrap();
        let header = format!("Bearer {}", token);
        let ctx = AuthService::context_from_header(Some(SECRET), Some(&header)).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));
        assert_eq!(ctx.roles, vec![ADMIN]);
    }

    #[test]
    fn test_invalid_tokens_are_rejected() {
        let token = AuthService::create_jwt("another-secret-another-secret-xx", "alice", None, 3600).unwrap();
        let header = format!("Bearer {}", token);
        assert!(matches!(
            AuthService::context_from_header(Some(SECRET), Some(&header)),
            Err(DbError::Unauthorized(_))
        ));
        assert!(AuthService::context_from_header(Some(SECRET), Some("42")).is_err());
    }
}
