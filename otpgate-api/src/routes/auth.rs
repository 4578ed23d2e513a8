/// Password accounts and sessions
///
/// # Endpoints
///
/// - `POST /api/auth/register` - Create a password account
/// - `POST /api/auth/login` - Sign in with phone or email and password
/// - `POST /api/auth/logout` - Revoke the current session
/// - `GET /api/auth/me` - Current user
///
/// QR sign-in lives in [`super::qr_login`]; both flows end in
/// [`issue_session`].

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use otpgate_shared::{
    auth::{
        jwt::{create_token, Claims},
        middleware::AuthContext,
        password,
    },
    models::{
        session::{AuthMethod, Session},
        user::{CreateUser, User, UserRole},
    },
    phone::normalize_phone,
};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Phone in any common format; normalized before storage
    #[validate(length(min = 1, max = 32, message = "Phone is required"))]
    pub phone: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    /// Password (will be validated for strength)
    #[validate(length(max = 128, message = "Password must be at most 128 characters"))]
    pub password: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Phone number or email
    #[validate(length(min = 1, max = 254, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Issued session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Bearer token
    pub token: String,

    pub expires_at: DateTime<Utc>,

    pub user: User,
}

/// Signs a token for `user` and stores its session row
///
/// The session id is generated first because it is embedded in the token.
pub async fn issue_session<'e, E>(
    executor: E,
    state: &AppState,
    user: &User,
    method: AuthMethod,
) -> ApiResult<(Session, String)>
where
    E: PgExecutor<'e>,
{
    let session_id = Uuid::new_v4();
    let claims = Claims::new(user.id, session_id, user.role, method, state.config.session_ttl());
    let token = create_token(&claims, state.jwt_secret())?;

    let session = Session::create(
        executor,
        session_id,
        user.id,
        &token,
        claims.expires_at(),
        method,
    )
    .await?;

    info!(user_id = %user.id, session_id = %session.id, method = method.as_str(), "Session issued");
    Ok((session, token))
}

/// Role for an account created now
pub fn initial_role(state: &AppState, phone: &str) -> UserRole {
    if state.config.is_seed_admin(phone) {
        UserRole::Admin
    } else {
        UserRole::User
    }
}

/// Register a new password account
///
/// Creates the user, grants the welcome credits and issues a session in one
/// transaction.
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/register
/// Content-Type: application/json
///
/// {
///   "phone": "+1 415 555 0100",
///   "email": "user@example.com",
///   "name": "Jane",
///   "password": "hunter22x"
/// }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "success": true,
///   "data": { "token": "eyJ...", "expires_at": "...", "user": { "id": "uuid", ... } }
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Invalid phone
/// - `409 Conflict`: Phone or email already registered
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<ApiResponse<SessionResponse>> {
    req.validate()?;

    password::validate_password_strength(&req.password)
        .map_err(|e| ApiError::invalid_field("password", e))?;

    let phone = normalize_phone(&req.phone, &state.config.phone.default_country_code)?;
    let email = req
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    let password_hash = password::hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            role: initial_role(&state, &phone),
            phone: Some(phone),
            email,
            name,
            password_hash: Some(password_hash),
        },
    )
    .await?;

    state.ledger.grant_welcome(&mut tx, user.id).await?;
    let (session, token) = issue_session(&mut *tx, &state, &user, AuthMethod::Password).await?;

    tx.commit().await?;

    info!(user_id = %user.id, "User registered");

    Ok(ApiResponse::created(SessionResponse {
        token,
        expires_at: session.expires_at,
        user,
    }))
}

/// Login with phone or email and password
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/login
/// Content-Type: application/json
///
/// { "identifier": "user@example.com", "password": "hunter22x" }
/// ```
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown account, wrong password, or an account
///   that only signs in by QR
/// - `403 Forbidden`: Account is blocked
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<ApiResponse<SessionResponse>> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let identifier = req.identifier.trim();

    let found = if identifier.contains('@') {
        User::find_by_email(&state.db, &identifier.to_lowercase()).await?
    } else {
        match normalize_phone(identifier, &state.config.phone.default_country_code) {
            Ok(phone) => User::find_by_phone(&state.db, &phone).await?,
            Err(_) => None,
        }
    };
    let user = found.ok_or_else(invalid)?;

    let Some(stored_hash) = user.password_hash.as_deref() else {
        return Err(invalid());
    };

    if !password::verify_password(&req.password, stored_hash)? {
        return Err(invalid());
    }

    if user.is_blocked {
        return Err(ApiError::Forbidden("User is blocked".to_string()));
    }

    let (session, token) = issue_session(&state.db, &state, &user, AuthMethod::Password).await?;

    Ok(ApiResponse::ok(SessionResponse {
        token,
        expires_at: session.expires_at,
        user,
    }))
}

/// Revoke the current session
///
/// The token stops working immediately because the middleware checks the
/// session row on every request.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<()>> {
    Session::delete(&state.db, auth.session_id, auth.user_id).await?;
    info!(user_id = %auth.user_id, session_id = %auth.session_id, "Logged out");

    Ok(ApiResponse::message("Logged out"))
}

/// Current user
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<User>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ApiResponse::ok(user))
}
