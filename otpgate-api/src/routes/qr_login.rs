/// QR / WhatsApp login
///
/// 1. The dashboard asks for a login request and shows the QR.
/// 2. The user scans it; their messaging app sends `VERIFY <hash>` to the bot.
/// 3. The bot calls [`whatsapp_verify`] with the sender's phone and the hash.
/// 4. The dashboard polls [`qr_status`] until it gets a session token.
///
/// # Endpoints
///
/// - `POST /api/auth/qr/request` - Issue a login request (public)
/// - `GET /api/auth/qr/status/:hash` - Poll a login request (public)
/// - `POST /api/auth/whatsapp-verify` - Bot webhook (`X-Internal-Secret`)

use crate::{
    app::AppState,
    bot::INTERNAL_SECRET_HEADER,
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::auth::{initial_role, issue_session},
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use otpgate_shared::{
    auth::tokens::{constant_time_compare, generate_login_hash, validate_login_hash_format},
    db::locks::{lock_phone, PhoneLockScope},
    login_links::{parse_verify_text, LoginLinks},
    models::{
        login_request::{FailureReason, LoginRequest, PollState},
        session::{AuthMethod, Session},
        user::User,
    },
    phone::normalize_phone,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct QrRequest {
    #[validate(length(min = 1, max = 32, message = "Phone is required"))]
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct QrRequestResponse {
    pub hash_code: String,
    pub qr_code_data: String,
    pub whatsapp_link: String,
    pub sms_link: String,
    pub expires_at: DateTime<Utc>,
    pub poll_interval_seconds: u64,
}

/// Poll result; fields depend on `status`
#[derive(Debug, Serialize)]
pub struct QrStatusResponse {
    /// `pending`, `expired` or `verified`
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl QrStatusResponse {
    fn bare(status: &'static str) -> Self {
        Self {
            status,
            expires_at: None,
            token: None,
            user: None,
        }
    }
}

/// Bot webhook body
///
/// The bot may send the hash it parsed or the raw `VERIFY <hash>` text.
#[derive(Debug, Deserialize)]
pub struct WhatsappVerifyRequest {
    pub phone: String,
    pub hash: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WhatsappVerifyResponse {
    pub verified: bool,
    pub user_id: Option<Uuid>,
}

/// Issue a login request
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/qr/request
///
/// { "phone": "+972 50 123 4567" }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "hash_code": "9f2c…(64 hex)",
///     "qr_code_data": "https://wa.me/15550000000?text=VERIFY%209f2c…",
///     "whatsapp_link": "https://wa.me/15550000000?text=VERIFY%209f2c…",
///     "sms_link": "sms:+15550000000?body=VERIFY%209f2c…",
///     "expires_at": "…",
///     "poll_interval_seconds": 2
///   }
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Phone cannot be normalized
/// - `429 Too Many Requests`: Too many pending requests for this phone
pub async fn request_qr(
    State(state): State<AppState>,
    Json(req): Json<QrRequest>,
) -> ApiResult<ApiResponse<QrRequestResponse>> {
    req.validate()?;

    let config = &state.config;
    let phone = normalize_phone(&req.phone, &config.phone.default_country_code)?;

    let mut tx = state.db.begin().await?;
    lock_phone(&mut tx, PhoneLockScope::LoginRequest, &phone).await?;

    let pending = LoginRequest::count_pending_for_phone(&mut *tx, &phone).await?;
    if pending >= config.login.max_pending_per_phone {
        return Err(ApiError::RateLimitExceeded {
            retry_after: config.login.request_ttl_seconds.max(0) as u64,
            message: "Too many pending login requests for this phone".to_string(),
        });
    }

    let hash_code = generate_login_hash();
    let links = LoginLinks::build(&config.bot.whatsapp_number, &config.bot.sms_number, &hash_code);
    let expires_at = Utc::now() + Duration::seconds(config.login.request_ttl_seconds);

    let request =
        LoginRequest::create(&mut *tx, &phone, &hash_code, &links.qr_code_data, expires_at)
            .await?;
    tx.commit().await?;

    info!(login_request_id = %request.id, "Login request issued");

    Ok(ApiResponse::ok(QrRequestResponse {
        hash_code: request.hash_code,
        qr_code_data: request.qr_code_data,
        whatsapp_link: links.whatsapp_link,
        sms_link: links.sms_link,
        expires_at: request.expires_at,
        poll_interval_seconds: config.login.poll_interval_seconds,
    }))
}

/// Poll a login request
///
/// A recorded failure answers `400` with the reason as the message so the
/// client stops polling. Unverified requests past their expiry are reported
/// as `expired`, never `pending`.
///
/// # Errors
///
/// - `400 Bad Request`: Verification was rejected (`phone_mismatch`, `user_blocked`)
/// - `403 Forbidden`: The account was blocked after verification
/// - `404 Not Found`: Unknown hash
pub async fn qr_status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<ApiResponse<QrStatusResponse>> {
    let not_found = || ApiError::NotFound("Login request not found".to_string());

    if !validate_login_hash_format(&hash) {
        return Err(not_found());
    }

    let request = LoginRequest::find_by_hash(&state.db, &hash)
        .await?
        .ok_or_else(not_found)?;

    let response = match request.poll_state(Utc::now()) {
        PollState::Failed(reason) => return Err(ApiError::BadRequest(reason)),
        PollState::Expired => QrStatusResponse::bare("expired"),
        PollState::Pending => QrStatusResponse {
            expires_at: Some(request.expires_at),
            ..QrStatusResponse::bare("pending")
        },
        PollState::Verified => {
            let (token, user) = complete_login(&state, request.id).await?;
            QrStatusResponse {
                token: Some(token),
                user: Some(user),
                ..QrStatusResponse::bare("verified")
            }
        }
    };

    Ok(ApiResponse::ok(response))
}

/// Hands out the session of a verified request
///
/// Reuses the session recorded on the request while it is still valid,
/// otherwise resolves the user by phone and mints a new one.
async fn complete_login(state: &AppState, request_id: Uuid) -> ApiResult<(String, User)> {
    let mut tx = state.db.begin().await?;

    let request = LoginRequest::lock_for_update(&mut tx, request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Login request not found".to_string()))?;

    let user = match request.user_id {
        Some(user_id) => User::find_by_id(&mut *tx, user_id).await?,
        None => None,
    };

    let user = match user {
        Some(user) => user,
        None => {
            let role = initial_role(state, &request.phone);
            let (user, created) = User::find_or_create_by_phone(&mut tx, &request.phone, role).await?;
            if created {
                state.ledger.grant_welcome(&mut tx, user.id).await?;
            }
            user
        }
    };

    if user.is_blocked {
        return Err(ApiError::Forbidden("User is blocked".to_string()));
    }

    if let Some(session_id) = request.session_id {
        if let Some(session) = Session::find_by_id(&mut *tx, session_id).await? {
            if session.user_id == user.id && session.is_valid_at(Utc::now()) {
                tx.commit().await?;
                return Ok((session.token, user));
            }
        }
    }

    let (session, token) = issue_session(&mut *tx, state, &user, AuthMethod::Qr).await?;
    LoginRequest::attach_session(&mut *tx, request.id, user.id, session.id).await?;
    tx.commit().await?;

    Ok((token, user))
}

/// Bot webhook: a user sent `VERIFY <hash>` from `phone`
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/whatsapp-verify
/// X-Internal-Secret: <shared secret>
///
/// { "phone": "+972501234567", "hash": "9f2c…" }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: No hash in the body
/// - `401 Unauthorized`: Missing or wrong shared secret
/// - `403 Forbidden`: The account behind the phone is blocked
/// - `404 Not Found`: No unexpired request with this hash
/// - `409 Conflict`: The phone does not match the request
pub async fn whatsapp_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WhatsappVerifyRequest>,
) -> ApiResult<ApiResponse<WhatsappVerifyResponse>> {
    let secret = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_compare(secret, &state.config.bot.shared_secret) {
        return Err(ApiError::Unauthorized("Invalid internal secret".to_string()));
    }

    let hash = req
        .hash
        .as_deref()
        .map(str::trim)
        .or_else(|| req.message.as_deref().and_then(parse_verify_text))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing hash".to_string()))?
        .to_string();

    let phone = normalize_phone(&req.phone, &state.config.phone.default_country_code)?;

    let request = LoginRequest::find_active_by_hash(&state.db, &hash)
        .await?
        .ok_or_else(|| ApiError::NotFound("Login request not found or expired".to_string()))?;

    if request.is_verified {
        if request.phone == phone {
            return Ok(verified(request.user_id));
        }

        warn!(
            login_request_id = %request.id,
            "Verified login request presented again from a different phone"
        );
        return Err(ApiError::Conflict(
            "Login request was verified by another phone".to_string(),
        ));
    }

    if let Some(reason) = &request.last_failed_reason {
        return Err(ApiError::Conflict(format!("Login request failed: {}", reason)));
    }

    if request.phone != phone {
        LoginRequest::record_failure(&state.db, request.id, FailureReason::PhoneMismatch).await?;
        warn!(login_request_id = %request.id, "Phone mismatch on login verification");
        return Err(ApiError::Conflict(
            "Phone number does not match the login request".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;

    if LoginRequest::mark_verified(&mut tx, request.id).await?.is_none() {
        tx.rollback().await?;

        // Lost a race with a concurrent webhook or the request just expired
        return match LoginRequest::find_by_hash(&state.db, &hash).await? {
            Some(current) if current.is_verified => Ok(verified(current.user_id)),
            _ => Err(ApiError::NotFound(
                "Login request not found or expired".to_string(),
            )),
        };
    }

    let (user, created) =
        User::find_or_create_by_phone(&mut tx, &phone, initial_role(&state, &phone)).await?;

    if user.is_blocked {
        tx.rollback().await?;
        LoginRequest::record_failure(&state.db, request.id, FailureReason::UserBlocked).await?;
        return Err(ApiError::Forbidden("User is blocked".to_string()));
    }

    if created {
        state.ledger.grant_welcome(&mut tx, user.id).await?;
    }

    let (session, _) = issue_session(&mut *tx, &state, &user, AuthMethod::Qr).await?;
    LoginRequest::attach_session(&mut *tx, request.id, user.id, session.id).await?;
    tx.commit().await?;

    info!(
        login_request_id = %request.id,
        user_id = %user.id,
        new_user = created,
        "Login request verified"
    );

    let bot = state.bot.clone();
    tokio::spawn(async move {
        bot.notify(&phone, "You are now signed in. You can return to your browser.")
            .await;
    });

    Ok(verified(Some(user.id)))
}

fn verified(user_id: Option<Uuid>) -> ApiResponse<WhatsappVerifyResponse> {
    ApiResponse::ok(WhatsappVerifyResponse {
        verified: true,
        user_id,
    })
}
