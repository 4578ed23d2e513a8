/// Organization API tokens
///
/// Tokens let an organization's backend call the external validation endpoint
/// without a user session.
///
/// # Security
///
/// - Tokens are stored as SHA-256 hashes (never plaintext)
/// - Tokens are prefixed with `otpg_` for identification
/// - The full token is only returned on creation
/// - Revocation is permanent
///
/// # Schema
///
/// ```sql
/// CREATE TABLE org_api_tokens (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     name VARCHAR(100) NOT NULL,
///     token_prefix VARCHAR(12) NOT NULL,
///     token_hash VARCHAR(64) NOT NULL UNIQUE,
///     created_by UUID REFERENCES users(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_used_at TIMESTAMPTZ,
///     revoked BOOLEAN NOT NULL DEFAULT FALSE,
///     revoked_at TIMESTAMPTZ
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::models::org_api_token::OrgApiToken;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, org_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
/// let (token, plaintext) = OrgApiToken::create(&pool, org_id, "backend", user_id).await?;
///
/// // Shown once
/// println!("{}", plaintext);
///
/// let resolved = OrgApiToken::validate(&pool, &plaintext).await?;
/// assert_eq!(resolved.map(|t| t.id), Some(token.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::tokens::{display_prefix, generate_org_token, hash_secret};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgApiToken {
    pub id: Uuid,

    pub organization_id: Uuid,

    /// Human-readable label
    pub name: String,

    /// First 12 characters, for display (`otpg_AbC1234`)
    pub token_prefix: String,

    /// SHA-256 of the full token
    #[serde(skip_serializing)]
    pub token_hash: String,

    pub created_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,

    pub revoked: bool,

    pub revoked_at: Option<DateTime<Utc>>,
}

impl OrgApiToken {
    /// Creates a token and returns it with its plaintext
    pub async fn create(
        pool: &PgPool,
        organization_id: Uuid,
        name: &str,
        created_by: Uuid,
    ) -> Result<(Self, String), sqlx::Error> {
        let (plaintext, token_hash) = generate_org_token();

        let token = sqlx::query_as::<_, OrgApiToken>(
            r#"
            INSERT INTO org_api_tokens (organization_id, name, token_prefix, token_hash, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, name, token_prefix, token_hash, created_by,
                      created_at, last_used_at, revoked, revoked_at
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(display_prefix(&plaintext))
        .bind(token_hash)
        .bind(created_by)
        .fetch_one(pool)
        .await?;

        Ok((token, plaintext))
    }

    /// Resolves an unrevoked token by plaintext and touches `last_used_at`
    pub async fn validate(pool: &PgPool, plaintext: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrgApiToken>(
            r#"
            UPDATE org_api_tokens
            SET last_used_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE
            RETURNING id, organization_id, name, token_prefix, token_hash, created_by,
                      created_at, last_used_at, revoked, revoked_at
            "#,
        )
        .bind(hash_secret(plaintext))
        .fetch_optional(pool)
        .await
    }

    /// Revokes a token scoped to its organization
    pub async fn revoke(
        pool: &PgPool,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE org_api_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE id = $1 AND organization_id = $2 AND revoked = FALSE
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_organization(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrgApiToken>(
            r#"
            SELECT id, organization_id, name, token_prefix, token_hash, created_by,
                   created_at, last_used_at, revoked, revoked_at
            FROM org_api_tokens
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }
}
