/// Personal credit ledger
///
/// # Endpoints
///
/// - `GET /api/credits/balance` - Balance and trial gate
/// - `GET /api/credits/transactions` - Ledger rows, newest first
/// - `POST /api/credits/use` - Spend one credit

use crate::{
    app::AppState,
    error::ApiResult,
    response::ApiResponse,
    routes::{clamp_limit, LimitQuery},
};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use otpgate_shared::{
    auth::middleware::AuthContext,
    credits::TrialStatus,
    models::credit::{reasons, CreditTransaction},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
    pub trial: TrialStatus,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UseCreditRequest {
    /// Free-form label stored on the ledger row
    #[validate(length(min = 1, max = 64, message = "Reason must be 1-64 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UseCreditResponse {
    pub balance: i64,
}

/// Current balance and trial gate
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "balance": 7,
///     "trial": { "blocked": false, "reason": null, "successful_payments": 0, ... }
///   }
/// }
/// ```
pub async fn balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<BalanceResponse>> {
    let trial = state.ledger.trial_status(auth.user_id).await?;

    Ok(ApiResponse::ok(BalanceResponse {
        balance: trial.remaining_trial_credits,
        trial,
    }))
}

/// Ledger history (`?limit=`, default 50, max 100)
pub async fn transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<ApiResponse<Vec<CreditTransaction>>> {
    let limit = clamp_limit(query.limit, 50, 100);
    let rows = CreditTransaction::list_for_user(&state.db, auth.user_id, limit).await?;

    Ok(ApiResponse::ok(rows))
}

/// Spend one credit
///
/// # Errors
///
/// - `403 Forbidden`: Trial blocked, no credits left, or account blocked
pub async fn use_credit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<UseCreditRequest>>,
) -> ApiResult<ApiResponse<UseCreditResponse>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let reason = req.reason.as_deref().unwrap_or(reasons::USAGE);
    let balance = state.ledger.debit_user(auth.user_id, reason).await?;

    Ok(ApiResponse::ok(UseCreditResponse { balance }))
}
