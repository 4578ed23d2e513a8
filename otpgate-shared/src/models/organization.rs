/// Organizations and their memberships
///
/// An organization has exactly one owner (the creator) and any number of
/// members. Organizations hold their own credit ledger and API tokens; see
/// [`super::org_api_token`] and [`super::credit::OrgCreditTransaction`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE organizations (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     owner_id UUID NOT NULL REFERENCES users(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE organization_users (
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     user_id UUID NOT NULL REFERENCES users(id),
///     role VARCHAR(10) NOT NULL DEFAULT 'member',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (organization_id, user_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

/// Role inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    /// Creator; manages members, groups and tokens
    Owner,

    /// Read access to the organization
    Member,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "owner",
            OrgRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(OrgRole::Owner),
            "member" => Some(OrgRole::Member),
            _ => None,
        }
    }

    /// Can add/remove members, groups and tokens
    pub fn can_manage(&self) -> bool {
        matches!(self, OrgRole::Owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Organization as seen by one of its members
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationWithRole {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Member listing row (membership joined with the user)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgMember {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl Organization {
    /// Creates an organization and its owner membership
    ///
    /// Takes a connection so the caller can run both inserts in one
    /// transaction.
    pub async fn create(
        conn: &mut PgConnection,
        name: &str,
        owner_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (name, owner_id)
            VALUES ($1, $2)
            RETURNING id, name, owner_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .fetch_one(&mut *conn)
        .await?;

        Self::add_member(&mut *conn, org.id, owner_id, OrgRole::Owner).await?;

        Ok(org)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Organization>(
            "SELECT id, name, owner_id, created_at, updated_at FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Locks the organization row for the rest of the transaction
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, owner_id, created_at, updated_at
            FROM organizations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Organizations a user belongs to, with the user's role
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationWithRole>, sqlx::Error> {
        sqlx::query_as::<_, OrganizationWithRole>(
            r#"
            SELECT o.id, o.name, o.owner_id, ou.role, o.created_at
            FROM organizations o
            JOIN organization_users ou ON ou.organization_id = o.id
            WHERE ou.user_id = $1
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Admin listing, newest first
    pub async fn list(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, owner_id, created_at, updated_at
            FROM organizations
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM organizations")
            .fetch_one(pool)
            .await
    }

    /// Role of `user_id` in `organization_id`, if a member
    pub async fn member_role(
        pool: &PgPool,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrgRole>, sqlx::Error> {
        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM organization_users WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(role.as_deref().and_then(OrgRole::from_str))
    }

    /// Adds a membership
    ///
    /// # Errors
    ///
    /// A duplicate membership is a unique violation on the primary key.
    pub async fn add_member<'e, E>(
        executor: E,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO organization_users (organization_id, user_id, role) VALUES ($1, $2, $3)",
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Removes a membership and the user's group memberships in this org
    pub async fn remove_member(
        conn: &mut PgConnection,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM org_group_members gm
            USING org_groups g
            WHERE gm.group_id = g.id AND g.organization_id = $1 AND gm.user_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query(
            "DELETE FROM organization_users WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Members of an organization, owner first
    pub async fn list_members(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<OrgMember>, sqlx::Error> {
        sqlx::query_as::<_, OrgMember>(
            r#"
            SELECT u.id AS user_id, u.phone, u.email, u.name, ou.role,
                   ou.created_at AS joined_at
            FROM organization_users ou
            JOIN users u ON u.id = ou.user_id
            WHERE ou.organization_id = $1
            ORDER BY (ou.role = 'owner') DESC, ou.created_at
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_role() {
        assert_eq!(OrgRole::from_str("owner"), Some(OrgRole::Owner));
        assert_eq!(OrgRole::from_str("admin"), None);
        assert!(OrgRole::Owner.can_manage());
        assert!(!OrgRole::Member.can_manage());
        assert_eq!(OrgRole::Member.as_str(), "member");
    }
}
