/// Named groups of organization members

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgGroup {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Group with its member ids
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgGroupWithMembers {
    pub id: Uuid,
    pub name: String,
    pub member_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OrgGroup {
    /// Creates a group; duplicate names within an organization conflict
    pub async fn create(
        pool: &PgPool,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, OrgGroup>(
            r#"
            INSERT INTO org_groups (organization_id, name)
            VALUES ($1, $2)
            RETURNING id, organization_id, name, created_at
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    /// Finds a group scoped to its organization
    pub async fn find(
        pool: &PgPool,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrgGroup>(
            r#"
            SELECT id, organization_id, name, created_at
            FROM org_groups
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_with_members(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<OrgGroupWithMembers>, sqlx::Error> {
        sqlx::query_as::<_, OrgGroupWithMembers>(
            r#"
            SELECT g.id, g.name,
                   COALESCE(ARRAY_AGG(gm.user_id) FILTER (WHERE gm.user_id IS NOT NULL),
                            '{}') AS member_ids,
                   g.created_at
            FROM org_groups g
            LEFT JOIN org_group_members gm ON gm.group_id = g.id
            WHERE g.organization_id = $1
            GROUP BY g.id
            ORDER BY g.name
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }

    /// Adds a user to the group; idempotent
    pub async fn add_member(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO org_group_members (group_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_member(
        pool: &PgPool,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM org_group_members WHERE group_id = $1 AND user_id = $2")
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
