/// Support tickets and the public contact form
///
/// # Endpoints
///
/// - `GET/POST /api/support/tickets` - Own tickets
/// - `GET /api/support/tickets/:id` - One own ticket
/// - `POST /api/contact` - Contact form (public)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use otpgate_shared::{
    auth::middleware::AuthContext,
    models::{
        contact_message::{ContactMessage, CreateContactMessage},
        support_ticket::SupportTicket,
    },
    phone::normalize_phone,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 200, message = "Subject must be 1-200 characters"))]
    pub subject: String,

    #[validate(length(min = 1, max = 5000, message = "Message must be 1-5000 characters"))]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ContactRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub phone: Option<String>,

    #[validate(length(min = 1, max = 5000, message = "Message must be 1-5000 characters"))]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ContactReceipt {
    pub id: Uuid,
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<Vec<SupportTicket>>> {
    let tickets = SupportTicket::list_for_user(&state.db, auth.user_id).await?;
    Ok(ApiResponse::ok(tickets))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<ApiResponse<SupportTicket>> {
    req.validate()?;

    let ticket =
        SupportTicket::create(&state.db, auth.user_id, req.subject.trim(), req.message.trim())
            .await?;

    info!(ticket_id = %ticket.id, user_id = %auth.user_id, "Support ticket opened");
    Ok(ApiResponse::created(ticket))
}

/// One of the caller's tickets; other users' tickets are `404`
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<SupportTicket>> {
    let ticket = SupportTicket::find_for_user(&state.db, id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))?;

    Ok(ApiResponse::ok(ticket))
}

/// Store a contact form submission
///
/// An unparseable phone is kept as typed; the form is not a login surface.
pub async fn submit_contact(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> ApiResult<ApiResponse<ContactReceipt>> {
    req.validate()?;

    let phone = req
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(|p| normalize_phone(&p, &state.config.phone.default_country_code).unwrap_or(p));

    let message = ContactMessage::create(
        &state.db,
        CreateContactMessage {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_lowercase(),
            phone,
            message: req.message.trim().to_string(),
        },
    )
    .await?;

    info!(contact_message_id = %message.id, "Contact message received");
    Ok(ApiResponse::created(ContactReceipt { id: message.id })
        .with_message("Thanks, we will get back to you"))
}
