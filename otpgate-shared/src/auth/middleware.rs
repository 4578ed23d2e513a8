/// Bearer authentication for Axum
///
/// Two kinds of bearer credentials are accepted on different route groups:
///
/// - **Session tokens** (JWT) for dashboard users and admins. A token is only
///   accepted while its `sessions` row exists and is unexpired and the user is
///   not blocked, so logout and blocking take effect immediately.
/// - **Organization tokens** (`otpg_…`) for an organization's backend calling
///   the external validation endpoint.
///
/// # Request Extensions
///
/// After successful authentication the middleware inserts either an
/// [`AuthContext`] or an [`OrgTokenContext`].
///
/// # Example
///
/// ```no_run
/// use axum::{middleware, routing::get, Extension, Router};
/// use otpgate_shared::auth::middleware::{session_auth_middleware, AuthContext};
/// use sqlx::PgPool;
///
/// async fn whoami(Extension(auth): Extension<AuthContext>) -> String {
///     auth.user_id.to_string()
/// }
///
/// fn router(pool: PgPool, secret: String) -> Router {
///     Router::new()
///         .route("/me", get(whoami))
///         .layer(middleware::from_fn(move |req, next| {
///             session_auth_middleware(pool.clone(), secret.clone(), req, next)
///         }))
/// }
/// ```

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::jwt::{validate_token, JwtError};
use super::tokens::validate_org_token_format;
use crate::models::org_api_token::OrgApiToken;
use crate::models::session::{AuthMethod, Session};
use crate::models::user::{User, UserRole};

/// Authenticated user session, added to request extensions
///
/// ```
/// use axum::Extension;
/// use otpgate_shared::auth::middleware::AuthContext;
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("user {} via {:?}", auth.user_id, auth.method)
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,

    /// Session row backing the token
    pub session_id: Uuid,

    /// Current role, read from the user row (not the token)
    pub role: UserRole,

    /// How the session was obtained
    pub method: AuthMethod,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Authenticated organization token, added to request extensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgTokenContext {
    pub organization_id: Uuid,
    pub token_id: Uuid,
}

/// Authentication failure
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidToken(String),

    /// Signature is valid but the session was logged out or has expired
    #[error("Session is no longer valid")]
    SessionRevoked,

    #[error("User is blocked")]
    UserBlocked,

    #[error("Invalid or revoked organization token")]
    InvalidOrgToken,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            AuthError::UserBlocked => StatusCode::FORBIDDEN,
            AuthError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidFormat(_) => "bad_request",
            AuthError::UserBlocked => "forbidden",
            AuthError::DatabaseError(_) => "internal_error",
            _ => "unauthorized",
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
            JwtError::InvalidIssuer { .. } => AuthError::InvalidToken("Invalid issuer".to_string()),
            other => AuthError::InvalidToken(format!("Invalid token: {}", other)),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::DatabaseError(e) => {
                error!(error = %e, "Database error during authentication");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "error": self.code(),
            "message": message,
        });

        (self.status_code(), Json(body)).into_response()
    }
}

/// Extracts the token from `Authorization: Bearer <token>`
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    Ok(token)
}

/// Validates a session token end to end
///
/// Signature and claims first (no database access), then the session row,
/// then the user row.
pub async fn authenticate_session(
    pool: &PgPool,
    secret: &str,
    token: &str,
) -> Result<AuthContext, AuthError> {
    let claims = validate_token(token, secret)?;

    let session = Session::find_valid(pool, claims.sid, claims.sub)
        .await?
        .ok_or(AuthError::SessionRevoked)?;

    let user = User::find_by_id(pool, claims.sub)
        .await?
        .ok_or(AuthError::SessionRevoked)?;

    if user.is_blocked {
        debug!(user_id = %user.id, "Rejected session of blocked user");
        return Err(AuthError::UserBlocked);
    }

    Ok(AuthContext {
        user_id: user.id,
        session_id: session.id,
        role: user.role,
        method: session.get_auth_method().unwrap_or(claims.auth_method),
    })
}

/// Resolves an organization token
pub async fn authenticate_org_token(
    pool: &PgPool,
    token: &str,
) -> Result<OrgTokenContext, AuthError> {
    if !validate_org_token_format(token) {
        return Err(AuthError::InvalidOrgToken);
    }

    let org_token = OrgApiToken::validate(pool, token)
        .await?
        .ok_or(AuthError::InvalidOrgToken)?;

    Ok(OrgTokenContext {
        organization_id: org_token.organization_id,
        token_id: org_token.id,
    })
}

/// Session bearer middleware
pub async fn session_auth_middleware(
    pool: PgPool,
    secret: String,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer(req.headers())?.to_string();
    let auth = authenticate_session(&pool, &secret, &token).await?;

    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

/// Organization token bearer middleware
pub async fn org_token_auth_middleware(
    pool: PgPool,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer(req.headers())?.to_string();
    let context = authenticate_org_token(&pool, &token).await?;

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")).unwrap(), "abc.def");
        assert!(matches!(
            extract_bearer(&HeaderMap::new()),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            extract_bearer(&headers("Basic Zm9vOmJhcg==")),
            Err(AuthError::InvalidFormat(_))
        ));
        assert!(matches!(
            extract_bearer(&headers("Bearer ")),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(AuthError::MissingCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::InvalidFormat("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::SessionRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UserBlocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::InvalidOrgToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::DatabaseError("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_error_into_response() {
        let response = AuthError::UserBlocked.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AuthError::DatabaseError("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_jwt_errors_map_to_invalid_token() {
        assert!(matches!(AuthError::from(JwtError::Expired), AuthError::InvalidToken(m) if m == "Token expired"));
        assert!(matches!(
            AuthError::from(JwtError::ValidationError("bad".to_string())),
            AuthError::InvalidToken(_)
        ));
    }

    #[test]
    fn test_auth_context_admin() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role: UserRole::Admin,
            method: AuthMethod::Password,
        };
        assert!(ctx.is_admin());
    }

    #[tokio::test]
    async fn test_malformed_org_token_rejected_without_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();

        assert!(matches!(
            authenticate_org_token(&pool, "not-a-token").await,
            Err(AuthError::InvalidOrgToken)
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();

        assert!(matches!(
            authenticate_session(&pool, "secret-key-that-is-at-least-32-bytes", "x.y.z").await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
