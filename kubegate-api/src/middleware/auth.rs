//! Authentication middleware
//!
//! Validates bearer JWTs and attaches the caller's identity and namespace
//! permissions to the request.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Namespace entry granting every namespace and cluster-wide access
pub const ALL_NAMESPACES: &str = "*";

/// Extracted user information from authentication
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub namespaces: Vec<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    fn has_all_namespaces(&self) -> bool {
        self.namespaces.iter().any(|ns| ns == ALL_NAMESPACES)
    }

    /// Namespaced access needs that namespace; cluster-wide access needs `*`
    pub fn can_access(&self, namespace: Option<&str>) -> bool {
        if self.has_all_namespaces() {
            return true;
        }
        match namespace {
            Some(ns) => self.namespaces.iter().any(|allowed| allowed == ns),
            None => false,
        }
    }

    pub fn require_namespace(&self, namespace: Option<&str>) -> Result<(), ApiError> {
        if self.can_access(namespace) {
            Ok(())
        } else {
            Err(ApiError::namespace_denied(namespace))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::admin_required())
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Expiration time (seconds since epoch)
    pub exp: usize,
    /// Issued at (seconds since epoch)
    pub iat: usize,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            namespaces: claims.namespaces,
        }
    }
}

/// Validate a JWT with HS256 signature and expiry checks
pub fn validate_jwt_token(secret: &str, token: &str) -> Result<Claims, String> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| format!("JWT validation failed: {}", e))?;

    Ok(token_data.claims)
}

/// Sign claims with HS256. Issuance belongs to the identity provider; this
/// exists for tooling and tests.
pub fn generate_jwt_token(secret: &str, claims: &Claims) -> Result<String, String> {
    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| format!("Failed to generate JWT: {}", e))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::AuthenticationFailed)?;

    match validate_jwt_token(&state.config.auth.jwt_secret, token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser::from(claims));
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            Err(ApiError::AuthenticationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn claims(namespaces: &[&str], role: &str) -> Claims {
        let now = chrono::Utc::now().timestamp() as usize;
        Claims {
            sub: "user123".to_string(),
            username: "alice".to_string(),
            role: role.to_string(),
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn test_round_trip_token() {
        let token = generate_jwt_token(SECRET, &claims(&["default"], "user")).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = validate_jwt_token(SECRET, &token).unwrap();
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.namespaces, vec!["default".to_string()]);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(validate_jwt_token(SECRET, "invalid").is_err());

        let token = generate_jwt_token("other-secret", &claims(&[], "user")).unwrap();
        assert!(validate_jwt_token(SECRET, &token).is_err());

        let mut expired = claims(&[], "user");
        expired.exp = 1;
        let token = generate_jwt_token(SECRET, &expired).unwrap();
        assert!(validate_jwt_token(SECRET, &token).is_err());
    }

    #[test]
    fn test_namespace_permissions() {
        let user = AuthUser::from(claims(&["default", "staging"], "user"));
        assert!(user.can_access(Some("default")));
        assert!(!user.can_access(Some("kube-system")));
        assert!(!user.can_access(None));
        assert!(user.require_admin().is_err());

        let admin = AuthUser::from(claims(&[ALL_NAMESPACES], "admin"));
        assert!(admin.can_access(Some("kube-system")));
        assert!(admin.can_access(None));
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
