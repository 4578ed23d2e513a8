/// Admin console
///
/// Mounted under `/api/admin` behind the session middleware and the admin
/// role check (`403` for everyone else). Mutations are single
/// `UPDATE … RETURNING` statements; the ledger operations are the only
/// multi-statement writes.
///
/// # Endpoints
///
/// - `GET /stats`
/// - `GET /users`, `POST /users/:id/{block,unblock,role,credits}`
/// - `GET /tickets`, `POST /tickets/:id/{respond,close}`
/// - `GET /login-requests`, `GET /otp-requests`
/// - `GET /payments`, `POST /payments/:id/{complete,fail}`
/// - `GET /contact-messages`, `POST /contact-messages/:id/read`
/// - `GET /organizations`, `POST /organizations/:id/credits`
/// - `POST /maintenance/normalize-phones`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::clamp_limit,
};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use otpgate_shared::{
    auth::middleware::AuthContext,
    models::{
        contact_message::ContactMessage,
        credit::reasons,
        login_request::{LoginRequest, LoginRequestCounts, LoginRequestStatus},
        organization::Organization,
        otp_request::OtpRequest,
        payment::{Payment, PaymentStatus},
        support_ticket::{SupportTicket, TicketStatus},
        user::{User, UserCounts, UserFilter, UserRole},
    },
    phone::{normalize_phone, plan_normalization, NormalizationPlan},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub users: UserCounts,
    pub login_requests: LoginRequestCounts,
    pub otps_sent: i64,
    pub open_tickets: i64,
    pub successful_payments_cents: i64,
    pub organizations: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub blocked: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantCreditsRequest {
    #[validate(range(min = 1, max = 1_000_000, message = "Amount must be positive"))]
    pub amount: i32,

    #[validate(length(min = 1, max = 64, message = "Reason must be 1-64 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RespondTicketRequest {
    #[validate(length(min = 1, max = 5000, message = "Response must be 1-5000 characters"))]
    pub response: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CloseTicketRequest {
    #[validate(length(min = 1, max = 5000, message = "Response must be 1-5000 characters"))]
    pub response: Option<String>,
}

/// Result of the phone maintenance run
#[derive(Debug, Serialize)]
pub struct NormalizeReport {
    pub scanned: usize,
    pub updated: usize,
    pub skipped_conflicts: usize,
    pub invalid: usize,
    pub login_requests_updated: u64,
}

/// Dashboard counters
pub async fn stats(State(state): State<AppState>) -> ApiResult<ApiResponse<StatsResponse>> {
    let db = &state.db;

    Ok(ApiResponse::ok(StatsResponse {
        users: User::counts(db).await?,
        login_requests: LoginRequest::counts(db).await?,
        otps_sent: OtpRequest::count(db).await?,
        open_tickets: SupportTicket::count_open(db).await?,
        successful_payments_cents: Payment::successful_total_cents(db).await?,
        organizations: Organization::count(db).await?,
    }))
}

/// `GET /users?search=&blocked=&limit=`
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<ApiResponse<Vec<User>>> {
    let filter = UserFilter {
        search: query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        blocked: query.blocked,
        limit: clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT),
    };

    let users = User::search(&state.db, filter).await?;
    Ok(ApiResponse::ok(users))
}

pub async fn block_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<User>> {
    if id == auth.user_id {
        return Err(ApiError::BadRequest("You cannot block yourself".to_string()));
    }

    let user = User::set_blocked(&state.db, id, true)
        .await?
        .ok_or_else(user_not_found)?;

    info!(admin_id = %auth.user_id, user_id = %id, "User blocked");
    Ok(ApiResponse::ok(user))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<User>> {
    let user = User::set_blocked(&state.db, id, false)
        .await?
        .ok_or_else(user_not_found)?;

    info!(admin_id = %auth.user_id, user_id = %id, "User unblocked");
    Ok(ApiResponse::ok(user))
}

/// Change a user's role; admins cannot demote themselves
pub async fn set_user_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<ApiResponse<User>> {
    if id == auth.user_id && req.role != UserRole::Admin {
        return Err(ApiError::BadRequest("You cannot demote yourself".to_string()));
    }

    let user = User::set_role(&state.db, id, req.role)
        .await?
        .ok_or_else(user_not_found)?;

    info!(admin_id = %auth.user_id, user_id = %id, role = req.role.as_str(), "User role changed");
    Ok(ApiResponse::ok(user))
}

pub async fn grant_user_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantCreditsRequest>,
) -> ApiResult<ApiResponse<BalanceResponse>> {
    req.validate()?;

    let reason = req.reason.as_deref().unwrap_or(reasons::ADMIN_GRANT);
    let balance = state.ledger.grant(id, req.amount, reason).await?;

    info!(admin_id = %auth.user_id, user_id = %id, amount = req.amount, "Admin granted credits");
    Ok(ApiResponse::ok(BalanceResponse { balance }))
}

/// `GET /tickets?status=open|in_progress|closed&limit=`
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<StatusListQuery>,
) -> ApiResult<ApiResponse<Vec<SupportTicket>>> {
    let status = parse_status(query.status.as_deref(), TicketStatus::from_str)?;
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);

    let tickets = SupportTicket::list(&state.db, status, limit).await?;
    Ok(ApiResponse::ok(tickets))
}

/// Answer a ticket; moves it to `in_progress`
pub async fn respond_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RespondTicketRequest>,
) -> ApiResult<ApiResponse<SupportTicket>> {
    req.validate()?;

    let ticket = SupportTicket::respond(&state.db, id, req.response.trim())
        .await?
        .ok_or_else(ticket_not_open)?;

    Ok(ApiResponse::ok(ticket))
}

/// Close a ticket and tell the user over WhatsApp (best effort)
pub async fn close_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CloseTicketRequest>>,
) -> ApiResult<ApiResponse<SupportTicket>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let ticket = SupportTicket::close(&state.db, id, req.response.as_deref().map(str::trim))
        .await?
        .ok_or_else(ticket_not_open)?;

    match User::find_by_id(&state.db, ticket.user_id).await? {
        Some(User {
            phone: Some(phone), ..
        }) => {
            let bot = state.bot.clone();
            let message = format!(
                "Your support ticket \"{}\" has been closed.",
                ticket.subject
            );
            tokio::spawn(async move {
                bot.notify(&phone, &message).await;
            });
        }
        _ => warn!(ticket_id = %ticket.id, "Ticket owner has no phone, skipping notice"),
    }

    Ok(ApiResponse::ok(ticket))
}

/// `GET /login-requests?status=pending|verified|expired|failed&limit=`
pub async fn list_login_requests(
    State(state): State<AppState>,
    Query(query): Query<StatusListQuery>,
) -> ApiResult<ApiResponse<Vec<LoginRequest>>> {
    let status = parse_status(query.status.as_deref(), |s| match s {
        "pending" => Some(LoginRequestStatus::Pending),
        "verified" => Some(LoginRequestStatus::Verified),
        "expired" => Some(LoginRequestStatus::Expired),
        "failed" => Some(LoginRequestStatus::Failed),
        _ => None,
    })?;
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);

    let requests = LoginRequest::list(&state.db, status, limit).await?;
    Ok(ApiResponse::ok(requests))
}

pub async fn list_otp_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<OtpRequest>>> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let requests = OtpRequest::list(&state.db, limit).await?;
    Ok(ApiResponse::ok(requests))
}

/// `GET /payments?status=pending|success|failed&limit=`
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<StatusListQuery>,
) -> ApiResult<ApiResponse<Vec<Payment>>> {
    let status = parse_status(query.status.as_deref(), PaymentStatus::from_str)?;
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);

    let payments = Payment::list(&state.db, status, limit).await?;
    Ok(ApiResponse::ok(payments))
}

/// Settle a pending payment and credit the user
///
/// # Errors
///
/// - `404 Not Found`: Unknown payment
/// - `409 Conflict`: The payment is no longer pending
pub async fn complete_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<Payment>> {
    match state.ledger.complete_payment(id).await? {
        Some(payment) => {
            info!(admin_id = %auth.user_id, payment_id = %id, "Payment marked successful");
            Ok(ApiResponse::ok(payment))
        }
        None => Err(settle_failure(&state, id).await),
    }
}

pub async fn fail_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<Payment>> {
    match Payment::settle(&state.db, id, PaymentStatus::Failed).await? {
        Some(payment) => {
            info!(admin_id = %auth.user_id, payment_id = %id, "Payment marked failed");
            Ok(ApiResponse::ok(payment))
        }
        None => Err(settle_failure(&state, id).await),
    }
}

async fn settle_failure(state: &AppState, id: Uuid) -> ApiError {
    match Payment::find_by_id(&state.db, id).await {
        Ok(Some(_)) => ApiError::Conflict("Payment is not pending".to_string()),
        Ok(None) => ApiError::NotFound("Payment not found".to_string()),
        Err(e) => e.into(),
    }
}

pub async fn list_contact_messages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<ContactMessage>>> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let messages = ContactMessage::list(&state.db, limit).await?;
    Ok(ApiResponse::ok(messages))
}

pub async fn mark_contact_message_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<ContactMessage>> {
    let message = ContactMessage::mark_read(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Contact message not found".to_string()))?;

    Ok(ApiResponse::ok(message))
}

pub async fn list_organizations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<Organization>>> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let orgs = Organization::list(&state.db, limit).await?;
    Ok(ApiResponse::ok(orgs))
}

pub async fn grant_organization_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantCreditsRequest>,
) -> ApiResult<ApiResponse<BalanceResponse>> {
    req.validate()?;

    let reason = req.reason.as_deref().unwrap_or(reasons::ADMIN_GRANT);
    let balance = state.ledger.grant_organization(id, req.amount, reason).await?;

    info!(admin_id = %auth.user_id, organization_id = %id, amount = req.amount, "Admin granted organization credits");
    Ok(ApiResponse::ok(BalanceResponse { balance }))
}

/// Rewrite stored phones into normalized form
///
/// Users whose normalized phone collides with another account are skipped
/// and counted. Pending login requests are rewritten as well so they still
/// match the account phone when the bot verifies them.
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": { "scanned": 120, "updated": 7, "skipped_conflicts": 1, "invalid": 2, "login_requests_updated": 3 }
/// }
/// ```
pub async fn normalize_phones(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<NormalizeReport>> {
    let country_code = &state.config.phone.default_country_code;

    let rows = User::list_phones(&state.db).await?;
    let plan: NormalizationPlan<Uuid> = plan_normalization(&rows, country_code);

    let pending = LoginRequest::list_pending_phones(&state.db).await?;

    let mut tx = state.db.begin().await?;

    let mut updated = 0;
    for (id, phone) in &plan.updates {
        if User::set_phone(&mut *tx, *id, phone).await? {
            updated += 1;
        }
    }

    let mut login_requests_updated = 0;
    for stored in &pending {
        if let Ok(normalized) = normalize_phone(stored, country_code) {
            if &normalized != stored {
                login_requests_updated +=
                    LoginRequest::rewrite_pending_phone(&mut *tx, stored, &normalized).await?;
            }
        }
    }

    tx.commit().await?;

    info!(
        admin_id = %auth.user_id,
        scanned = plan.scanned,
        updated = updated,
        skipped_conflicts = plan.skipped_conflicts,
        invalid = plan.invalid,
        login_requests_updated = login_requests_updated,
        "Phone normalization finished"
    );

    Ok(ApiResponse::ok(NormalizeReport {
        scanned: plan.scanned,
        updated,
        skipped_conflicts: plan.skipped_conflicts,
        invalid: plan.invalid,
        login_requests_updated,
    }))
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

fn ticket_not_open() -> ApiError {
    ApiError::NotFound("Ticket not found or already closed".to_string())
}

/// Parses an optional `?status=` value
fn parse_status<T>(value: Option<&str>, parse: impl Fn(&str) -> Option<T>) -> ApiResult<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse(v)
            .map(Some)
            .ok_or_else(|| ApiError::invalid_field("status", format!("Unknown status '{}'", v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None, TicketStatus::from_str).unwrap(), None);
        assert_eq!(parse_status(Some(""), TicketStatus::from_str).unwrap(), None);
        assert_eq!(
            parse_status(Some("in_progress"), TicketStatus::from_str).unwrap(),
            Some(TicketStatus::InProgress)
        );
        assert!(parse_status(Some("archived"), PaymentStatus::from_str).is_err());
    }

    #[test]
    fn test_grant_validation() {
        let req = GrantCreditsRequest {
            amount: 0,
            reason: None,
        };
        assert!(req.validate().is_err());

        let req = GrantCreditsRequest {
            amount: 25,
            reason: Some("promo".to_string()),
        };
        assert!(req.validate().is_ok());
    }
}
