/// Per-organization usage of verified login requests
///
/// One row per `(organization_id, login_request_id)`; the unique constraint
/// `org_usage_once_per_request` is what guarantees an organization is charged
/// at most once for a given login request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgUsage {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub login_request_id: Uuid,
    pub api_token_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OrgUsage {
    /// Records usage unless it already exists
    ///
    /// Returns `Some` for the first recording and `None` when the pair was
    /// already recorded (no charge is due).
    pub async fn record_once(
        conn: &mut PgConnection,
        organization_id: Uuid,
        login_request_id: Uuid,
        api_token_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrgUsage>(
            r#"
            INSERT INTO org_usage (organization_id, login_request_id, api_token_id)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT org_usage_once_per_request DO NOTHING
            RETURNING id, organization_id, login_request_id, api_token_id, created_at
            "#,
        )
        .bind(organization_id)
        .bind(login_request_id)
        .bind(api_token_id)
        .fetch_optional(conn)
        .await
    }
}
