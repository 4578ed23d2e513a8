/// One-time codes delivered by the bot
///
/// Sending costs one credit. The credit is reserved under the user row lock
/// before the bot is called and committed only once the bot accepted the
/// message, so concurrent sends by one user are serialized and a failed
/// delivery leaves nothing behind.
///
/// # Endpoints
///
/// - `POST /api/otp/send` - Send a 6-digit code to a phone
/// - `POST /api/otp/verify` - Check a code

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use otpgate_shared::{
    auth::{
        middleware::AuthContext,
        tokens::{generate_otp_code, hash_secret, verify_secret},
    },
    db::locks::{lock_phone, PhoneLockScope},
    models::{
        credit::reasons,
        otp_request::{OtpRequest, OTP_RATE_LIMIT, OTP_RATE_WINDOW_MINUTES},
    },
    phone::normalize_phone,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SendOtpRequest {
    #[validate(length(min = 1, max = 32, message = "Phone is required"))]
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub phone: String,
    pub expires_at: DateTime<Utc>,
    pub balance: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 1, max = 32, message = "Phone is required"))]
    pub phone: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
}

/// Send a code
///
/// # Errors
///
/// - `400 Bad Request`: Invalid phone
/// - `403 Forbidden`: Trial blocked or no credits left
/// - `429 Too Many Requests`: More than 3 codes to this phone in 10 minutes
/// - `503 Service Unavailable`: The bot could not deliver; nothing is charged
pub async fn send_otp(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SendOtpRequest>,
) -> ApiResult<ApiResponse<SendOtpResponse>> {
    req.validate()?;

    let phone = normalize_phone(&req.phone, &state.config.phone.default_country_code)?;

    let mut debit = state.ledger.reserve_debit(auth.user_id).await?;

    lock_phone(debit.conn(), PhoneLockScope::OtpSend, &phone).await?;
    let recent = OtpRequest::count_recent_for_phone(debit.conn(), &phone).await?;
    if recent >= OTP_RATE_LIMIT {
        return Err(ApiError::RateLimitExceeded {
            retry_after: (OTP_RATE_WINDOW_MINUTES * 60) as u64,
            message: "Too many codes sent to this phone, try again later".to_string(),
        });
    }

    let code = generate_otp_code();
    let expires_at = OtpRequest::expiry_from(Utc::now());
    let request =
        OtpRequest::create(debit.conn(), auth.user_id, &phone, &hash_secret(&code), expires_at)
            .await?;

    // Dropping `debit` on failure discards the request row with the debit
    state.bot.send_otp(&phone, &code).await.map_err(|e| {
        warn!(otp_request_id = %request.id, error = %e, "OTP delivery failed");
        ApiError::from(e)
    })?;

    let balance = debit.commit(reasons::OTP_SEND).await?;

    info!(user_id = %auth.user_id, otp_request_id = %request.id, "OTP sent");

    Ok(ApiResponse::ok(SendOtpResponse {
        phone,
        expires_at: request.expires_at,
        balance,
    }))
}

/// Check a code
///
/// # Errors
///
/// - `400 Bad Request`: Wrong code, or no active code for this phone
/// - `429 Too Many Requests`: Attempt budget spent
pub async fn verify_otp(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<VerifyOtpRequest>,
) -> ApiResult<ApiResponse<VerifyOtpResponse>> {
    req.validate()?;

    let phone = normalize_phone(&req.phone, &state.config.phone.default_country_code)?;

    let request = OtpRequest::find_latest_active(&state.db, auth.user_id, &phone)
        .await?
        .ok_or_else(|| ApiError::BadRequest("No active code for this phone".to_string()))?;

    let locked = || ApiError::RateLimitExceeded {
        retry_after: (request.expires_at - Utc::now()).num_seconds().max(0) as u64,
        message: "Too many attempts, request a new code".to_string(),
    };

    if request.is_locked() {
        return Err(locked());
    }

    let Some(attempts) = OtpRequest::reserve_attempt(&state.db, request.id).await? else {
        return Err(locked());
    };

    if !verify_secret(req.code.trim(), &request.code_hash) {
        warn!(otp_request_id = %request.id, attempts = attempts, "Wrong OTP code");
        return Err(ApiError::BadRequest("Invalid code".to_string()));
    }

    if !OtpRequest::mark_verified(&state.db, request.id).await? {
        return Err(ApiError::BadRequest("Code already used".to_string()));
    }

    info!(user_id = %auth.user_id, otp_request_id = %request.id, "OTP verified");
    Ok(ApiResponse::ok(VerifyOtpResponse { verified: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_request_requires_six_digit_code() {
        let req = VerifyOtpRequest {
            phone: "+14155550100".to_string(),
            code: "1234".to_string(),
        };
        assert!(req.validate().is_err());

        let req = VerifyOtpRequest {
            phone: "+14155550100".to_string(),
            code: "123456".to_string(),
        };
        assert!(req.validate().is_ok());
    }
}
