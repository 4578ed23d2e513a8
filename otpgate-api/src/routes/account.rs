/// Settings and profile of the signed-in user
///
/// # Endpoints
///
/// - `GET /api/settings` - Stored settings or defaults
/// - `PUT /api/settings` - Partial update
/// - `PUT /api/profile` - Update name and/or email

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
};
use axum::{extract::State, Extension, Json};
use otpgate_shared::{
    auth::middleware::AuthContext,
    models::{
        user::{UpdateProfile, User},
        user_settings::{UpdateSettings, UserSettings},
    },
};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingsRequest {
    #[validate(length(min = 2, max = 10, message = "Language must be a language code"))]
    pub language: Option<String>,

    pub notifications_enabled: Option<bool>,

    pub whatsapp_notifications: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<UserSettings>> {
    let settings = UserSettings::get_or_default(&state.db, auth.user_id).await?;
    Ok(ApiResponse::ok(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<ApiResponse<UserSettings>> {
    req.validate()?;

    let settings = UserSettings::upsert(
        &state.db,
        auth.user_id,
        UpdateSettings {
            language: req.language.map(|l| l.trim().to_lowercase()),
            notifications_enabled: req.notifications_enabled,
            whatsapp_notifications: req.whatsapp_notifications,
        },
    )
    .await?;

    Ok(ApiResponse::ok(settings))
}

/// Update name and/or email
///
/// # Errors
///
/// - `409 Conflict`: Email belongs to another account
/// - `422 Unprocessable Entity`: Validation failed
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<ApiResponse<User>> {
    req.validate()?;

    let user = User::update_profile(
        &state.db,
        auth.user_id,
        UpdateProfile {
            name: req.name.map(|n| n.trim().to_string()),
            email: req.email.map(|e| e.trim().to_lowercase()),
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ApiResponse::ok(user))
}
