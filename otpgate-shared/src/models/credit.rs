/// Append-only credit ledgers
///
/// Two ledgers share the same shape: the personal ledger
/// (`auth_credit_transactions`, keyed by user) and the organization ledger
/// (`org_auth_credit_transactions`, keyed by organization). Neither has a
/// balance column; the balance is always `SUM(credit) - SUM(debit)` computed
/// at read time.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE auth_credit_transactions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id),
///     type VARCHAR(10) NOT NULL CHECK (type IN ('credit', 'debit')),
///     amount INTEGER NOT NULL CHECK (amount > 0),
///     reason VARCHAR(100) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// Ledger reasons written by the service
pub mod reasons {
    pub const WELCOME_BONUS: &str = "welcome_bonus";
    pub const USAGE: &str = "usage";
    pub const OTP_SEND: &str = "otp_send";
    pub const PAYMENT: &str = "payment";
    pub const ADMIN_GRANT: &str = "admin_grant";
    pub const HASH_VALIDATION: &str = "hash_validation";
}

/// Direction of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(TransactionType::Credit),
            "debit" => Some(TransactionType::Debit),
            _ => None,
        }
    }
}

/// Personal ledger row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Organization ledger row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgCreditTransaction {
    pub id: Uuid,
    pub organization_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: i32,
    pub reason: String,
    pub login_request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Parsed direction
    pub fn get_type(&self) -> Option<TransactionType> {
        TransactionType::from_str(&self.tx_type)
    }

    /// Appends a row to a user's ledger
    pub async fn append<'e, E>(
        executor: E,
        user_id: Uuid,
        tx_type: TransactionType,
        amount: i32,
        reason: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            INSERT INTO auth_credit_transactions (user_id, type, amount, reason)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, type, amount, reason, created_at
            "#,
        )
        .bind(user_id)
        .bind(tx_type.as_str())
        .bind(amount)
        .bind(reason)
        .fetch_one(executor)
        .await
    }

    /// Current balance of a user (Σcredit − Σdebit)
    pub async fn balance<'e, E>(executor: E, user_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(CASE WHEN type = 'credit' THEN amount ELSE -amount END), 0)::BIGINT
            FROM auth_credit_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    /// Timestamp of the user's most recent debit
    pub async fn latest_debit_at<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(created_at)
            FROM auth_credit_transactions
            WHERE user_id = $1 AND type = 'debit'
            "#,
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    /// A user's ledger, newest first
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, type, amount, reason, created_at
            FROM auth_credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

impl OrgCreditTransaction {
    pub fn get_type(&self) -> Option<TransactionType> {
        TransactionType::from_str(&self.tx_type)
    }

    /// Appends a row to an organization's ledger
    pub async fn append<'e, E>(
        executor: E,
        organization_id: Uuid,
        tx_type: TransactionType,
        amount: i32,
        reason: &str,
        login_request_id: Option<Uuid>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OrgCreditTransaction>(
            r#"
            INSERT INTO org_auth_credit_transactions
                (organization_id, type, amount, reason, login_request_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, type, amount, reason, login_request_id, created_at
            "#,
        )
        .bind(organization_id)
        .bind(tx_type.as_str())
        .bind(amount)
        .bind(reason)
        .bind(login_request_id)
        .fetch_one(executor)
        .await
    }

    /// Current balance of an organization
    pub async fn balance<'e, E>(executor: E, organization_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(CASE WHEN type = 'credit' THEN amount ELSE -amount END), 0)::BIGINT
            FROM org_auth_credit_transactions
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_one(executor)
        .await
    }

    /// An organization's ledger, newest first
    pub async fn list_for_organization(
        pool: &PgPool,
        organization_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrgCreditTransaction>(
            r#"
            SELECT id, organization_id, type, amount, reason, login_request_id, created_at
            FROM org_auth_credit_transactions
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(organization_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
