/// Organizations, members, groups and API tokens
///
/// Every route requires a session. Reads need membership; changes to
/// members, groups and tokens need the owner role. Non-members get `404` so
/// organization ids are not disclosed.
///
/// # Endpoints
///
/// - `GET/POST /api/organizations`
/// - `GET /api/organizations/:org_id`
/// - `GET/POST /api/organizations/:org_id/members`
/// - `DELETE /api/organizations/:org_id/members/:user_id`
/// - `GET/POST /api/organizations/:org_id/groups`
/// - `POST /api/organizations/:org_id/groups/:group_id/members`
/// - `DELETE /api/organizations/:org_id/groups/:group_id/members/:user_id`
/// - `GET/POST /api/organizations/:org_id/tokens`
/// - `POST /api/organizations/:org_id/tokens/:token_id/revoke`
/// - `GET /api/organizations/:org_id/credits`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::{clamp_limit, LimitQuery},
};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use otpgate_shared::{
    auth::{
        authorization::{require_org_role, OrgAccess},
        middleware::AuthContext,
    },
    models::{
        credit::OrgCreditTransaction,
        org_api_token::OrgApiToken,
        org_group::{OrgGroup, OrgGroupWithMembers},
        organization::{OrgMember, OrgRole, Organization, OrganizationWithRole},
        user::User,
    },
    phone::normalize_phone,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct OrganizationDetail {
    #[serde(flatten)]
    pub organization: Organization,
    pub role: &'static str,
    pub balance: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    #[validate(length(min = 1, max = 32, message = "Phone is required"))]
    pub phone: String,

    /// `member` (default); an organization has exactly one owner
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddedMember {
    pub user_id: Uuid,
    pub role: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddGroupMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTokenRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

/// Newly created token; `token` is never shown again
#[derive(Debug, Serialize)]
pub struct CreatedToken {
    #[serde(flatten)]
    pub meta: OrgApiToken,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct OrgCreditsResponse {
    pub balance: i64,
    pub transactions: Vec<OrgCreditTransaction>,
}

/// Organizations the caller belongs to
pub async fn list_organizations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<Vec<OrganizationWithRole>>> {
    let orgs = Organization::list_for_user(&state.db, auth.user_id).await?;
    Ok(ApiResponse::ok(orgs))
}

/// Create an organization owned by the caller
///
/// # Endpoint
///
/// ```text
/// POST /api/organizations
///
/// { "name": "Acme" }
/// ```
pub async fn create_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateOrganizationRequest>,
) -> ApiResult<ApiResponse<Organization>> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let org = Organization::create(&mut tx, req.name.trim(), auth.user_id).await?;
    tx.commit().await?;

    info!(organization_id = %org.id, owner_id = %auth.user_id, "Organization created");
    Ok(ApiResponse::created(org))
}

/// Organization with the caller's role and the credit balance
pub async fn get_organization(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<ApiResponse<OrganizationDetail>> {
    let role = require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Read).await?;

    let organization = Organization::find_by_id(&state.db, org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    let balance = OrgCreditTransaction::balance(&state.db, org_id).await?;

    Ok(ApiResponse::ok(OrganizationDetail {
        organization,
        role: role.as_str(),
        balance,
    }))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<ApiResponse<Vec<OrgMember>>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Read).await?;

    let members = Organization::list_members(&state.db, org_id).await?;
    Ok(ApiResponse::ok(members))
}

/// Add an existing user by phone
///
/// # Errors
///
/// - `400 Bad Request`: Invalid phone or role
/// - `404 Not Found`: No user with this phone
/// - `409 Conflict`: Already a member
pub async fn add_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<ApiResponse<AddedMember>> {
    req.validate()?;
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let role = match req.role.as_deref() {
        None => OrgRole::Member,
        Some(value) => match OrgRole::from_str(value) {
            Some(OrgRole::Member) => OrgRole::Member,
            Some(OrgRole::Owner) => {
                return Err(ApiError::BadRequest(
                    "An organization has a single owner".to_string(),
                ))
            }
            None => return Err(ApiError::invalid_field("role", "Role must be 'member'")),
        },
    };

    let phone = normalize_phone(&req.phone, &state.config.phone.default_country_code)?;
    let user = User::find_by_phone(&state.db, &phone)
        .await?
        .ok_or_else(|| ApiError::NotFound("No user with this phone".to_string()))?;

    Organization::add_member(&state.db, org_id, user.id, role).await?;

    info!(organization_id = %org_id, user_id = %user.id, "Member added");
    Ok(ApiResponse::created(AddedMember {
        user_id: user.id,
        role: role.as_str(),
    }))
}

/// Remove a member (and their group memberships)
///
/// # Errors
///
/// - `400 Bad Request`: Attempt to remove the owner
/// - `404 Not Found`: Not a member
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((org_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<ApiResponse<()>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let org = Organization::find_by_id(&state.db, org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    if org.owner_id == user_id {
        return Err(ApiError::BadRequest(
            "The organization owner cannot be removed".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    let removed = Organization::remove_member(&mut tx, org_id, user_id).await?;
    if !removed {
        return Err(ApiError::NotFound("Member not found".to_string()));
    }
    tx.commit().await?;

    info!(organization_id = %org_id, user_id = %user_id, "Member removed");
    Ok(ApiResponse::message("Member removed"))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<ApiResponse<Vec<OrgGroupWithMembers>>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Read).await?;

    let groups = OrgGroup::list_with_members(&state.db, org_id).await?;
    Ok(ApiResponse::ok(groups))
}

/// Create a group; names are unique per organization (`409`)
pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<ApiResponse<OrgGroup>> {
    req.validate()?;
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let group = OrgGroup::create(&state.db, org_id, req.name.trim()).await?;
    Ok(ApiResponse::created(group))
}

/// Add an organization member to a group
///
/// # Errors
///
/// - `400 Bad Request`: The user is not a member of the organization
/// - `404 Not Found`: Unknown group
pub async fn add_group_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((org_id, group_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AddGroupMemberRequest>,
) -> ApiResult<ApiResponse<()>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let group = find_group(&state, org_id, group_id).await?;

    if Organization::member_role(&state.db, org_id, req.user_id)
        .await?
        .is_none()
    {
        return Err(ApiError::BadRequest(
            "User is not a member of this organization".to_string(),
        ));
    }

    OrgGroup::add_member(&state.db, group.id, req.user_id).await?;
    Ok(ApiResponse::message("Group member added"))
}

pub async fn remove_group_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((org_id, group_id, user_id)): Path<(Uuid, Uuid, Uuid)>,
) -> ApiResult<ApiResponse<()>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let group = find_group(&state, org_id, group_id).await?;
    if !OrgGroup::remove_member(&state.db, group.id, user_id).await? {
        return Err(ApiError::NotFound("Group member not found".to_string()));
    }

    Ok(ApiResponse::message("Group member removed"))
}

async fn find_group(state: &AppState, org_id: Uuid, group_id: Uuid) -> ApiResult<OrgGroup> {
    OrgGroup::find(&state.db, org_id, group_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Group not found".to_string()))
}

/// Tokens of the organization; hashes are never serialized
pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<ApiResponse<Vec<OrgApiToken>>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let tokens = OrgApiToken::list_for_organization(&state.db, org_id).await?;
    Ok(ApiResponse::ok(tokens))
}

/// Create a token
///
/// # Response (201)
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "id": "uuid",
///     "name": "backend",
///     "token_prefix": "otpg_AbC1234",
///     "token": "otpg_AbC1234...",
///     ...
///   }
/// }
/// ```
pub async fn create_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateTokenRequest>,
) -> ApiResult<ApiResponse<CreatedToken>> {
    req.validate()?;
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    let (meta, token) = OrgApiToken::create(&state.db, org_id, req.name.trim(), auth.user_id).await?;

    info!(organization_id = %org_id, token_id = %meta.id, "Organization token created");
    Ok(ApiResponse::created(CreatedToken { meta, token }))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((org_id, token_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<ApiResponse<()>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Manage).await?;

    if !OrgApiToken::revoke(&state.db, org_id, token_id).await? {
        return Err(ApiError::NotFound("Token not found".to_string()));
    }

    info!(organization_id = %org_id, token_id = %token_id, "Organization token revoked");
    Ok(ApiResponse::message("Token revoked"))
}

/// Balance and recent ledger rows (`?limit=`, default 50, max 100)
pub async fn credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<ApiResponse<OrgCreditsResponse>> {
    require_org_role(&state.db, org_id, auth.user_id, OrgAccess::Read).await?;

    let limit = clamp_limit(query.limit, 50, 100);
    let balance = OrgCreditTransaction::balance(&state.db, org_id).await?;
    let transactions =
        OrgCreditTransaction::list_for_organization(&state.db, org_id, limit).await?;

    Ok(ApiResponse::ok(OrgCreditsResponse {
        balance,
        transactions,
    }))
}
