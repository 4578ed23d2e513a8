/// Payment transactions
///
/// A payment starts `pending` and is settled once by an admin into `success`
/// (which credits the user's ledger in the same transaction) or `failed`.
/// A single successful payment lifts the user out of trial gating for good.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// Payment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    /// Credits granted on success
    pub credits: i32,
    pub status: String,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a payment
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub credits: i32,
    pub provider_reference: Option<String>,
}

impl Payment {
    pub fn get_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_str(&self.status)
    }

    pub async fn create(pool: &PgPool, data: CreatePayment) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payment_transactions
                (user_id, amount_cents, currency, credits, provider_reference)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, amount_cents, currency, credits, status,
                      provider_reference, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.amount_cents)
        .bind(data.currency)
        .bind(data.credits)
        .bind(data.provider_reference)
        .fetch_one(pool)
        .await
    }

    /// Moves a pending payment to `status`
    ///
    /// Returns `None` if the payment does not exist or is no longer pending.
    pub async fn settle<'e, E>(
        executor: E,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payment_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, user_id, amount_cents, currency, credits, status,
                      provider_reference, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, user_id, amount_cents, currency, credits, status,
                   provider_reference, created_at, updated_at
            FROM payment_transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, user_id, amount_cents, currency, credits, status,
                   provider_reference, created_at, updated_at
            FROM payment_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Admin listing, optionally by status
    pub async fn list(
        pool: &PgPool,
        status: Option<PaymentStatus>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, user_id, amount_cents, currency, credits, status,
                   provider_reference, created_at, updated_at
            FROM payment_transactions
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Number of successful payments of a user
    pub async fn count_successful<'e, E>(executor: E, user_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_transactions WHERE user_id = $1 AND status = 'success'",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    /// Sum of successful payments in cents
    pub async fn successful_total_cents(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM payment_transactions WHERE status = 'success'",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [PaymentStatus::Pending, PaymentStatus::Success, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("refunded"), None);
    }
}
