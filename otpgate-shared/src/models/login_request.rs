/// QR / WhatsApp login request
///
/// A login request is created when a browser asks for a QR code. The user
/// sends `VERIFY <hash_code>` to the bot from their phone; the bot calls the
/// verify webhook which flips `is_verified`. The browser polls the status
/// endpoint until it sees `verified`, `expired` or a failure reason.
///
/// ```text
/// pending ──verify──▶ verified (terminal)
///    │
///    └──expires_at passes──▶ expired (derived at read time)
/// ```
///
/// Rows are never swept; expiry is always evaluated against `expires_at`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE login_requests (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     phone VARCHAR(20) NOT NULL,
///     hash_code VARCHAR(64) NOT NULL UNIQUE,
///     qr_code_data TEXT NOT NULL,
///     is_verified BOOLEAN NOT NULL DEFAULT FALSE,
///     expires_at TIMESTAMPTZ NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     verified_at TIMESTAMPTZ,
///     last_failed_reason VARCHAR(50),
///     user_id UUID REFERENCES users(id),
///     session_id UUID REFERENCES sessions(id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

/// Recorded reason a request can no longer succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The bot reported a different phone than the one that asked for the QR
    PhoneMismatch,

    /// The account behind the phone is blocked
    UserBlocked,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PhoneMismatch => "phone_mismatch",
            FailureReason::UserBlocked => "user_blocked",
        }
    }
}

/// Status reported to a polling client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// A failure was recorded; the client should stop polling
    Failed(String),

    /// Not verified and past `expires_at`
    Expired,

    /// Waiting for the bot
    Pending,

    /// Verified by the bot
    Verified,
}

impl PollState {
    /// Status string used in responses and admin filters
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Failed(_) => "failed",
            PollState::Expired => "expired",
            PollState::Pending => "pending",
            PollState::Verified => "verified",
        }
    }
}

/// Admin listing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginRequestStatus {
    Pending,
    Verified,
    Expired,
    Failed,
}

impl LoginRequestStatus {
    /// SQL predicate matching [`LoginRequest::poll_state`]: a recorded
    /// failure wins over every other state
    fn predicate(&self) -> &'static str {
        match self {
            LoginRequestStatus::Failed => "last_failed_reason IS NOT NULL",
            LoginRequestStatus::Verified => "last_failed_reason IS NULL AND is_verified = TRUE",
            LoginRequestStatus::Pending => {
                "last_failed_reason IS NULL AND is_verified = FALSE AND expires_at > NOW()"
            }
            LoginRequestStatus::Expired => {
                "last_failed_reason IS NULL AND is_verified = FALSE AND expires_at <= NOW()"
            }
        }
    }
}

/// Login request row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LoginRequest {
    pub id: Uuid,

    /// Normalized phone that requested the QR
    pub phone: String,

    /// 64 hex chars, embedded in the QR payload
    pub hash_code: String,

    /// The payload the QR encodes (WhatsApp deep link)
    pub qr_code_data: String,

    pub is_verified: bool,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub verified_at: Option<DateTime<Utc>>,

    /// Set when verification was rejected
    pub last_failed_reason: Option<String>,

    /// User resolved at verification time
    pub user_id: Option<Uuid>,

    /// Session issued for this request, reused across polls
    pub session_id: Option<Uuid>,
}

/// Counts by derived status for the admin dashboard
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LoginRequestCounts {
    pub pending: i64,
    pub verified: i64,
    pub expired: i64,
    pub failed: i64,
}

impl LoginRequest {
    /// Derives the poll status at `now`
    ///
    /// Order matters: a recorded failure wins over everything, and an
    /// unverified request past its expiry is never reported as pending.
    pub fn poll_state(&self, now: DateTime<Utc>) -> PollState {
        if let Some(reason) = &self.last_failed_reason {
            return PollState::Failed(reason.clone());
        }

        if self.is_verified {
            return PollState::Verified;
        }

        if self.expires_at <= now {
            PollState::Expired
        } else {
            PollState::Pending
        }
    }

    /// Whether the request is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Inserts a new pending request
    pub async fn create<'e, E>(
        executor: E,
        phone: &str,
        hash_code: &str,
        qr_code_data: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, LoginRequest>(
            r#"
            INSERT INTO login_requests (phone, hash_code, qr_code_data, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, phone, hash_code, qr_code_data, is_verified, expires_at,
                      created_at, verified_at, last_failed_reason, user_id, session_id
            "#,
        )
        .bind(phone)
        .bind(hash_code)
        .bind(qr_code_data)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    /// Finds a request by hash, expired or not
    pub async fn find_by_hash<'e, E>(executor: E, hash_code: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, LoginRequest>(
            r#"
            SELECT id, phone, hash_code, qr_code_data, is_verified, expires_at,
                   created_at, verified_at, last_failed_reason, user_id, session_id
            FROM login_requests
            WHERE hash_code = $1
            "#,
        )
        .bind(hash_code)
        .fetch_optional(executor)
        .await
    }

    /// Finds an unexpired request by hash
    pub async fn find_active_by_hash<'e, E>(
        executor: E,
        hash_code: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, LoginRequest>(
            r#"
            SELECT id, phone, hash_code, qr_code_data, is_verified, expires_at,
                   created_at, verified_at, last_failed_reason, user_id, session_id
            FROM login_requests
            WHERE hash_code = $1 AND expires_at > NOW()
            "#,
        )
        .bind(hash_code)
        .fetch_optional(executor)
        .await
    }

    /// Locks the request row for the rest of the transaction
    ///
    /// Serialises concurrent polls of a verified request so only one of them
    /// mints the session.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LoginRequest>(
            r#"
            SELECT id, phone, hash_code, qr_code_data, is_verified, expires_at,
                   created_at, verified_at, last_failed_reason, user_id, session_id
            FROM login_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Flips the request to verified if it still is unverified and unexpired
    ///
    /// Returns `None` when another caller won the race (or the request
    /// expired in between); the caller then re-reads the row.
    pub async fn mark_verified(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LoginRequest>(
            r#"
            UPDATE login_requests
            SET is_verified = TRUE, verified_at = NOW()
            WHERE id = $1
              AND is_verified = FALSE
              AND last_failed_reason IS NULL
              AND expires_at > NOW()
            RETURNING id, phone, hash_code, qr_code_data, is_verified, expires_at,
                      created_at, verified_at, last_failed_reason, user_id, session_id
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Records why verification failed; only unverified requests are touched
    pub async fn record_failure<'e, E>(
        executor: E,
        id: Uuid,
        reason: FailureReason,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE login_requests
            SET last_failed_reason = $2
            WHERE id = $1 AND is_verified = FALSE
            "#,
        )
        .bind(id)
        .bind(reason.as_str())
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores the resolved user and issued session on the request
    pub async fn attach_session<'e, E>(
        executor: E,
        id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE login_requests SET user_id = $2, session_id = $3 WHERE id = $1")
            .bind(id)
            .bind(user_id)
            .bind(session_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Counts unexpired, unverified requests for a phone
    pub async fn count_pending_for_phone<'e, E>(executor: E, phone: &str) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM login_requests
            WHERE phone = $1
              AND is_verified = FALSE
              AND last_failed_reason IS NULL
              AND expires_at > NOW()
            "#,
        )
        .bind(phone)
        .fetch_one(executor)
        .await
    }

    /// Rewrites the phone of pending requests (maintenance normalization)
    pub async fn rewrite_pending_phone<'e, E>(
        executor: E,
        from: &str,
        to: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE login_requests SET phone = $2 WHERE phone = $1 AND is_verified = FALSE",
        )
        .bind(from)
        .bind(to)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Distinct phones of unverified requests (maintenance normalization)
    pub async fn list_pending_phones(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT phone FROM login_requests WHERE is_verified = FALSE",
        )
        .fetch_all(pool)
        .await
    }

    /// Admin listing, newest first, optionally by derived status
    pub async fn list(
        pool: &PgPool,
        status: Option<LoginRequestStatus>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let filter = status.map_or("TRUE", |s| s.predicate());

        let query = format!(
            r#"
            SELECT id, phone, hash_code, qr_code_data, is_verified, expires_at,
                   created_at, verified_at, last_failed_reason, user_id, session_id
            FROM login_requests
            WHERE {}
            ORDER BY created_at DESC
            LIMIT $1
            "#,
            filter
        );

        sqlx::query_as::<_, LoginRequest>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Counts requests by derived status
    pub async fn counts(pool: &PgPool) -> Result<LoginRequestCounts, sqlx::Error> {
        let query = format!(
            r#"
            SELECT COUNT(*) FILTER (WHERE {}) AS pending,
                   COUNT(*) FILTER (WHERE {}) AS verified,
                   COUNT(*) FILTER (WHERE {}) AS expired,
                   COUNT(*) FILTER (WHERE {}) AS failed
            FROM login_requests
            "#,
            LoginRequestStatus::Pending.predicate(),
            LoginRequestStatus::Verified.predicate(),
            LoginRequestStatus::Expired.predicate(),
            LoginRequestStatus::Failed.predicate(),
        );

        sqlx::query_as::<_, LoginRequestCounts>(&query)
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(is_verified: bool, expires_in: Duration, failure: Option<&str>) -> LoginRequest {
        let now = Utc::now();
        LoginRequest {
            id: Uuid::new_v4(),
            phone: "+14155550100".to_string(),
            hash_code: "ab".repeat(32),
            qr_code_data: "https://wa.me/15550000000?text=VERIFY%20abab".to_string(),
            is_verified,
            expires_at: now + expires_in,
            created_at: now,
            verified_at: None,
            last_failed_reason: failure.map(str::to_string),
            user_id: None,
            session_id: None,
        }
    }

    #[test]
    fn test_pending_before_expiry() {
        let req = request(false, Duration::minutes(5), None);
        assert_eq!(req.poll_state(Utc::now()), PollState::Pending);
    }

    #[test]
    fn test_expired_is_never_pending() {
        let req = request(false, Duration::minutes(5), None);

        // Exactly at expiry counts as expired
        assert_eq!(req.poll_state(req.expires_at), PollState::Expired);
        assert_eq!(
            req.poll_state(req.expires_at + Duration::seconds(1)),
            PollState::Expired
        );
        assert!(req.is_expired_at(req.expires_at));
    }

    #[test]
    fn test_verified_survives_expiry() {
        let req = request(true, Duration::minutes(-10), None);
        assert_eq!(req.poll_state(Utc::now()), PollState::Verified);
    }

    #[test]
    fn test_failure_reason_wins() {
        let req = request(false, Duration::minutes(5), Some("phone_mismatch"));
        assert_eq!(
            req.poll_state(Utc::now()),
            PollState::Failed("phone_mismatch".to_string())
        );

        let expired = request(false, Duration::minutes(-5), Some("phone_mismatch"));
        assert_eq!(expired.poll_state(Utc::now()).as_str(), "failed");
    }

    #[test]
    fn test_failure_reason_strings() {
        assert_eq!(FailureReason::PhoneMismatch.as_str(), "phone_mismatch");
        assert_eq!(FailureReason::UserBlocked.as_str(), "user_blocked");
    }

    #[test]
    fn test_failed_rows_only_match_failed_filter() {
        for status in [
            LoginRequestStatus::Pending,
            LoginRequestStatus::Verified,
            LoginRequestStatus::Expired,
        ] {
            assert!(
                status.predicate().starts_with("last_failed_reason IS NULL AND"),
                "{:?}",
                status
            );
        }
        assert_eq!(
            LoginRequestStatus::Failed.predicate(),
            "last_failed_reason IS NOT NULL"
        );
    }

    #[test]
    fn test_status_filter_serde() {
        let status: LoginRequestStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(status, LoginRequestStatus::Expired);
    }
}
