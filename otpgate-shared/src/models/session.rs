/// Session model
///
/// One row per issued bearer token. A user may hold many sessions; logging out
/// deletes the current row, which invalidates the token even though its
/// signature is still valid.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sessions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     token TEXT NOT NULL UNIQUE,
///     expires_at TIMESTAMPTZ NOT NULL,
///     auth_method VARCHAR(20) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// How a session was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Phone/email + password login
    Password,

    /// QR / WhatsApp hash verification
    Qr,

    /// One-time code
    Otp,
}

impl AuthMethod {
    /// Converts to the stored string
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Qr => "qr",
            AuthMethod::Otp => "otp",
        }
    }

    /// Parses the stored string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "password" => Some(AuthMethod::Password),
            "qr" => Some(AuthMethod::Qr),
            "otp" => Some(AuthMethod::Otp),
            _ => None,
        }
    }
}

/// Issued session
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,

    pub user_id: Uuid,

    /// The signed JWT handed to the client
    #[serde(skip_serializing)]
    pub token: String,

    pub expires_at: DateTime<Utc>,

    /// `password`, `qr` or `otp`
    pub auth_method: String,

    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Parsed auth method
    pub fn get_auth_method(&self) -> Option<AuthMethod> {
        AuthMethod::from_str(&self.auth_method)
    }

    /// Whether the session is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Inserts a session row
    ///
    /// The id is chosen by the caller because it is embedded in the token
    /// (`sid` claim) before the row exists.
    pub async fn create<'e, E>(
        executor: E,
        id: Uuid,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        auth_method: AuthMethod,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, token, expires_at, auth_method)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, token, expires_at, auth_method, created_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(auth_method.as_str())
        .fetch_one(executor)
        .await
    }

    /// Finds a session by ID, expired or not
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, token, expires_at, auth_method, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Finds an unexpired session belonging to `user_id`
    pub async fn find_valid(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, token, expires_at, auth_method, created_at
            FROM sessions
            WHERE id = $1 AND user_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Deletes a session (logout)
    ///
    /// Returns true if a row was removed.
    pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Timestamp of the user's most recent session issuance
    pub async fn latest_created_at<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(created_at) FROM sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }
}
