/// OTP requests sent through the bot on behalf of a user
///
/// Codes are stored as SHA-256 digests. A request is consumed by the first
/// matching verification and locked out once [`MAX_OTP_ATTEMPTS`] attempts
/// have been made. An attempt is counted before the code is compared.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// Lifetime of an OTP code
pub const OTP_TTL_MINUTES: i64 = 5;

/// Verification attempts allowed per request
pub const MAX_OTP_ATTEMPTS: i32 = 5;

/// Codes allowed per phone inside [`OTP_RATE_WINDOW_MINUTES`]
pub const OTP_RATE_LIMIT: i64 = 3;

/// Sliding window for the per-phone send limit
pub const OTP_RATE_WINDOW_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtpRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub attempts: i32,
    pub is_verified: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl OtpRequest {
    /// Expiry for a code created at `now`
    pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(OTP_TTL_MINUTES)
    }

    /// Whether the attempt budget is spent
    pub fn is_locked(&self) -> bool {
        self.attempts >= MAX_OTP_ATTEMPTS
    }

    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        phone: &str,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OtpRequest>(
            r#"
            INSERT INTO otp_requests (user_id, phone, code_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, phone, code_hash, attempts, is_verified,
                      expires_at, created_at, verified_at
            "#,
        )
        .bind(user_id)
        .bind(phone)
        .bind(code_hash)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    /// Codes sent to `phone` within the rate window
    ///
    /// Callers enforcing the limit hold the phone's advisory lock
    /// (`db::locks::lock_phone`) on the same connection.
    pub async fn count_recent_for_phone<'e, E>(executor: E, phone: &str) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM otp_requests
            WHERE phone = $1
              AND created_at > NOW() - make_interval(mins => $2::INT)
            "#,
        )
        .bind(phone)
        .bind(OTP_RATE_WINDOW_MINUTES as i32)
        .fetch_one(executor)
        .await
    }

    /// Latest unexpired, unverified request of `user_id` for `phone`
    pub async fn find_latest_active(
        pool: &PgPool,
        user_id: Uuid,
        phone: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OtpRequest>(
            r#"
            SELECT id, user_id, phone, code_hash, attempts, is_verified,
                   expires_at, created_at, verified_at
            FROM otp_requests
            WHERE user_id = $1
              AND phone = $2
              AND is_verified = FALSE
              AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(phone)
        .fetch_optional(pool)
        .await
    }

    /// Claims one attempt, returning the new count
    ///
    /// `None` when the budget is spent or the request is no longer active.
    /// The check and the increment are one statement, so concurrent guesses
    /// cannot all slip under the limit.
    pub async fn reserve_attempt(pool: &PgPool, id: Uuid) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE otp_requests
            SET attempts = attempts + 1
            WHERE id = $1
              AND attempts < $2
              AND is_verified = FALSE
              AND expires_at > NOW()
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(MAX_OTP_ATTEMPTS)
        .fetch_optional(pool)
        .await
    }

    /// Consumes the request; false if it was already verified concurrently
    pub async fn mark_verified(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE otp_requests
            SET is_verified = TRUE, verified_at = NOW()
            WHERE id = $1 AND is_verified = FALSE
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Admin listing, newest first
    pub async fn list(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OtpRequest>(
            r#"
            SELECT id, user_id, phone, code_hash, attempts, is_verified,
                   expires_at, created_at, verified_at
            FROM otp_requests
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Total codes sent
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM otp_requests")
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_five_minutes() {
        let now = Utc::now();
        assert_eq!(OtpRequest::expiry_from(now) - now, Duration::minutes(5));
    }

    #[test]
    fn test_lock_after_max_attempts() {
        let now = Utc::now();
        let mut otp = OtpRequest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            phone: "+14155550100".to_string(),
            code_hash: "x".to_string(),
            attempts: MAX_OTP_ATTEMPTS - 1,
            is_verified: false,
            expires_at: OtpRequest::expiry_from(now),
            created_at: now,
            verified_at: None,
        };

        assert!(!otp.is_locked());
        otp.attempts += 1;
        assert!(otp.is_locked());
    }
}
