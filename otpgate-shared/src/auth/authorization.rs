/// Authorization checks
///
/// Two layers:
///
/// 1. **Global role**: the admin console requires `UserRole::Admin`.
/// 2. **Organization role**: organization resources require membership, and
///    management (members, groups, tokens) requires the owner role.
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::auth::authorization::{require_org_role, OrgAccess};
/// use otpgate_shared::auth::middleware::AuthContext;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, auth: AuthContext, org_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// require_org_role(&pool, org_id, auth.user_id, OrgAccess::Manage).await?;
/// # Ok(())
/// # }
/// ```

use sqlx::PgPool;
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::organization::{OrgRole, Organization};

/// Authorization failure
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// Caller is not a member of the organization
    #[error("Not a member of organization {0}")]
    NotMember(Uuid),

    /// Caller is a member but not the owner
    #[error("Only the organization owner can do this")]
    NotOwner,

    /// Admin console access without the admin role
    #[error("Admin access required")]
    AdminRequired,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Access level for organization resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgAccess {
    /// Any member
    Read,

    /// Owner only
    Manage,
}

/// Checks that a role grants the requested access
pub fn check_org_access(role: OrgRole, access: OrgAccess) -> Result<(), AuthzError> {
    match access {
        OrgAccess::Read => Ok(()),
        OrgAccess::Manage if role.can_manage() => Ok(()),
        OrgAccess::Manage => Err(AuthzError::NotOwner),
    }
}

/// Requires the caller to be a global admin
pub fn require_admin(auth: &AuthContext) -> Result<(), AuthzError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(AuthzError::AdminRequired)
    }
}

/// Requires organization membership with at least `access`
///
/// Returns the caller's role. Non-members get `NotMember`, which the API
/// maps to 404 so organization ids are not disclosed.
pub async fn require_org_role(
    pool: &PgPool,
    organization_id: Uuid,
    user_id: Uuid,
    access: OrgAccess,
) -> Result<OrgRole, AuthzError> {
    let role = Organization::member_role(pool, organization_id, user_id)
        .await?
        .ok_or(AuthzError::NotMember(organization_id))?;

    check_org_access(role, access)?;
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::AuthMethod;
    use crate::models::user::UserRole;

    fn ctx(role: UserRole) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role,
            method: AuthMethod::Qr,
        }
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&ctx(UserRole::Admin)).is_ok());
        assert!(matches!(
            require_admin(&ctx(UserRole::User)),
            Err(AuthzError::AdminRequired)
        ));
    }

    #[test]
    fn test_org_access_matrix() {
        assert!(check_org_access(OrgRole::Owner, OrgAccess::Read).is_ok());
        assert!(check_org_access(OrgRole::Owner, OrgAccess::Manage).is_ok());
        assert!(check_org_access(OrgRole::Member, OrgAccess::Read).is_ok());
        assert!(matches!(
            check_org_access(OrgRole::Member, OrgAccess::Manage),
            Err(AuthzError::NotOwner)
        ));
    }
}
