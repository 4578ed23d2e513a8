/// Support tickets
///
/// `open → in_progress` when an admin responds, `→ closed` when closed.
/// Closed tickets stay closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TicketStatus::Open),
            "in_progress" => Some(TicketStatus::InProgress),
            "closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SupportTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub admin_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SupportTicket {
    pub fn get_status(&self) -> Option<TicketStatus> {
        TicketStatus::from_str(&self.status)
    }

    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        subject: &str,
        message: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            INSERT INTO support_tickets (user_id, subject, message)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, subject, message, status, admin_response,
                      created_at, updated_at, closed_at
            "#,
        )
        .bind(user_id)
        .bind(subject)
        .bind(message)
        .fetch_one(pool)
        .await
    }

    /// A user's own ticket; other users' tickets are not found
    pub async fn find_for_user(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT id, user_id, subject, message, status, admin_response,
                   created_at, updated_at, closed_at
            FROM support_tickets
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT id, user_id, subject, message, status, admin_response,
                   created_at, updated_at, closed_at
            FROM support_tickets
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
        status: Option<TicketStatus>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT id, user_id, subject, message, status, admin_response,
                   created_at, updated_at, closed_at
            FROM support_tickets
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

    /// Stores an admin response and moves the ticket to `in_progress`
    ///
    /// Closed tickets are left untouched (returns `None`).
    pub async fn respond(
        pool: &PgPool,
        id: Uuid,
        response: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            UPDATE support_tickets
            SET admin_response = $2, status = 'in_progress', updated_at = NOW()
            WHERE id = $1 AND status <> 'closed'
            RETURNING id, user_id, subject, message, status, admin_response,
                      created_at, updated_at, closed_at
            "#,
        )
        .bind(id)
        .bind(response)
        .fetch_optional(pool)
        .await
    }

    /// Closes a ticket, optionally replacing the admin response
    pub async fn close(
        pool: &PgPool,
        id: Uuid,
        response: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            UPDATE support_tickets
            SET status = 'closed',
                admin_response = COALESCE($2, admin_response),
                closed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status <> 'closed'
            RETURNING id, user_id, subject, message, status, admin_response,
                      created_at, updated_at, closed_at
            "#,
        )
        .bind(id)
        .bind(response)
        .fetch_optional(pool)
        .await
    }

    pub async fn count_open(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM support_tickets WHERE status <> 'closed'")
            .fetch_one(pool)
            .await
    }
}
