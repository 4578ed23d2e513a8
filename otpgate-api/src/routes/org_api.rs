/// Endpoints called by an organization's backend
///
/// Authenticated with an organization token (`Authorization: Bearer otpg_…`)
/// instead of a user session.
///
/// # Endpoints
///
/// - `POST /api/v1/validate-hash` - Check a login request, charging the
///   organization once per verified request

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{extract::State, Extension, Json};
use chrono::Utc;
use otpgate_shared::{
    auth::{middleware::OrgTokenContext, tokens::validate_login_hash_format},
    models::login_request::{LoginRequest, PollState},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ValidateHashRequest {
    pub hash_code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateHashResponse {
    pub verified: bool,

    /// Poll state of the request (`pending`, `expired`, `failed`, `verified`)
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

/// Validate a login hash on behalf of an organization
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/validate-hash
/// Authorization: Bearer otpg_...
///
/// { "hash_code": "9f2c…" }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": { "verified": true, "status": "verified", "phone": "+972501234567", "charged": true, "balance": 41 }
/// }
/// ```
///
/// Repeating the call for the same request returns `charged: false`.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing, unknown or revoked token
/// - `403 Forbidden`: The organization has no credits left
/// - `404 Not Found`: Unknown hash
pub async fn validate_hash(
    State(state): State<AppState>,
    Extension(ctx): Extension<OrgTokenContext>,
    Json(req): Json<ValidateHashRequest>,
) -> ApiResult<ApiResponse<ValidateHashResponse>> {
    let hash = req.hash_code.trim();
    let not_found = || ApiError::NotFound("Login request not found".to_string());

    if !validate_login_hash_format(hash) {
        return Err(not_found());
    }

    let request = LoginRequest::find_by_hash(&state.db, hash)
        .await?
        .ok_or_else(not_found)?;

    let poll = request.poll_state(Utc::now());
    if !matches!(poll, PollState::Verified) {
        return Ok(ApiResponse::ok(ValidateHashResponse {
            verified: false,
            status: poll.as_str(),
            phone: None,
            charged: None,
            balance: None,
        }));
    }

    let charge = state
        .ledger
        .charge_organization_once(ctx.organization_id, request.id, Some(ctx.token_id))
        .await?;

    Ok(ApiResponse::ok(ValidateHashResponse {
        verified: true,
        status: poll.as_str(),
        phone: Some(request.phone),
        charged: Some(charge.charged),
        balance: Some(charge.balance),
    }))
}
