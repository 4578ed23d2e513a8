/// Credit purchases
///
/// A payment is recorded as `pending`; an admin settles it, which credits
/// the ledger (see `admin::complete_payment`).
///
/// # Endpoints
///
/// - `GET /api/payments` - Own payments
/// - `POST /api/payments` - Record a pending payment

use crate::{app::AppState, error::ApiResult, response::ApiResponse};
use axum::{extract::State, Extension, Json};
use otpgate_shared::{
    auth::middleware::AuthContext,
    models::payment::{CreatePayment, Payment},
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount_cents: i64,

    #[validate(range(min = 1, max = 1_000_000, message = "Credits must be positive"))]
    pub credits: i32,

    /// ISO 4217 code, defaults to `USD`
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,

    #[validate(length(max = 255))]
    pub provider_reference: Option<String>,
}

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<Vec<Payment>>> {
    let payments = Payment::list_for_user(&state.db, auth.user_id).await?;
    Ok(ApiResponse::ok(payments))
}

/// Record a pending payment
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Non-positive amount or credits
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<ApiResponse<Payment>> {
    req.validate()?;

    let payment = Payment::create(
        &state.db,
        CreatePayment {
            user_id: auth.user_id,
            amount_cents: req.amount_cents,
            currency: req
                .currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
            credits: req.credits,
            provider_reference: req.provider_reference,
        },
    )
    .await?;

    info!(
        payment_id = %payment.id,
        user_id = %auth.user_id,
        amount_cents = payment.amount_cents,
        "Payment recorded"
    );

    Ok(ApiResponse::created(payment))
}
