/// User model and database operations
///
/// A user is identified by a normalized phone number, an email, or both.
/// QR/WhatsApp accounts have no password hash; password accounts are created
/// through registration. Users are never hard-deleted.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     phone VARCHAR(20) UNIQUE,
///     email CITEXT UNIQUE,
///     name VARCHAR(255),
///     password_hash VARCHAR(255),
///     role user_role NOT NULL DEFAULT 'user',
///     is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::models::user::{CreateUser, User, UserRole};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let user = User::create(&pool, CreateUser {
///     phone: Some("+14155550100".to_string()),
///     email: None,
///     name: Some("Ada".to_string()),
///     password_hash: None,
///     role: UserRole::User,
/// }).await?;
///
/// let found = User::find_by_phone(&pool, "+14155550100").await?;
/// assert_eq!(found.map(|u| u.id), Some(user.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular dashboard/API user
    User,

    /// Admin console access
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Normalized phone (`+<digits>`)
    pub phone: Option<String>,

    /// Email (case-insensitive via CITEXT)
    pub email: Option<String>,

    /// Display name
    pub name: Option<String>,

    /// Argon2id hash; `None` for QR-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    /// Role
    pub role: UserRole,

    /// Blocked users cannot authenticate or use credits
    pub is_blocked: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub role: UserRole,
}

/// Profile fields a user may change
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Filters for the admin user listing
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Substring match on phone, email or name
    pub search: Option<String>,
    pub blocked: Option<bool>,
    pub limit: i64,
}

/// Aggregate user counts for the admin dashboard
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserCounts {
    pub total: i64,
    pub blocked: i64,
    pub admins: i64,
}

impl User {
    /// Whether the account can sign in with a password
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Creates a new user
    ///
    /// # Errors
    ///
    /// Returns a database error on duplicate phone or email (unique
    /// violation) or connection failure.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (phone, email, name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, phone, email, name, password_hash, role, is_blocked,
                      created_at, updated_at
            "#,
        )
        .bind(data.phone)
        .bind(data.email)
        .bind(data.name)
        .bind(data.password_hash)
        .bind(data.role)
        .fetch_one(executor)
        .await
    }

    /// Finds the user for a phone, creating one if needed
    ///
    /// Returns the user and whether it was created by this call. Safe against
    /// a concurrent insert of the same phone: the conflicting insert is
    /// skipped and the existing row is returned.
    pub async fn find_or_create_by_phone(
        conn: &mut PgConnection,
        phone: &str,
        role: UserRole,
    ) -> Result<(Self, bool), sqlx::Error> {
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (phone, role)
            VALUES ($1, $2)
            ON CONFLICT (phone) DO NOTHING
            RETURNING id, phone, email, name, password_hash, role, is_blocked,
                      created_at, updated_at
            "#,
        )
        .bind(phone)
        .bind(role)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        let existing = Self::find_by_phone(&mut *conn, phone)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok((existing, false))
    }

    /// Finds a user by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, email, name, password_hash, role, is_blocked,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Finds a user by normalized phone
    pub async fn find_by_phone<'e, E>(executor: E, phone: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, email, name, password_hash, role, is_blocked,
                   created_at, updated_at
            FROM users
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(executor)
        .await
    }

    /// Finds a user by email (case-insensitive)
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, email, name, password_hash, role, is_blocked,
                   created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Locks the user row for the rest of the transaction
    ///
    /// Serialises check-then-debit sequences on the personal ledger.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, email, name, password_hash, role, is_blocked,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Updates name and/or email
    ///
    /// Only `Some` fields are written. Returns `None` if the user does not
    /// exist.
    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        data: UpdateProfile,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE users SET updated_at = NOW()");
        let mut bind_count = 1;

        if data.name.is_some() {
            bind_count += 1;
            query.push_str(&format!(", name = ${}", bind_count));
        }
        if data.email.is_some() {
            bind_count += 1;
            query.push_str(&format!(", email = ${}", bind_count));
        }

        query.push_str(
            " WHERE id = $1 RETURNING id, phone, email, name, password_hash, role, is_blocked, created_at, updated_at",
        );

        let mut q = sqlx::query_as::<_, User>(&query).bind(id);

        if let Some(name) = data.name {
            q = q.bind(name);
        }
        if let Some(email) = data.email {
            q = q.bind(email);
        }

        q.fetch_optional(pool).await
    }

    /// Blocks or unblocks a user
    pub async fn set_blocked(
        pool: &PgPool,
        id: Uuid,
        blocked: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_blocked = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, phone, email, name, password_hash, role, is_blocked,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(blocked)
        .fetch_optional(pool)
        .await
    }

    /// Changes a user's role
    pub async fn set_role(
        pool: &PgPool,
        id: Uuid,
        role: UserRole,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET role = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, phone, email, name, password_hash, role, is_blocked,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(role)
        .fetch_optional(pool)
        .await
    }

    /// Rewrites a stored phone (maintenance normalization)
    pub async fn set_phone<'e, E>(executor: E, id: Uuid, phone: &str) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET phone = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(phone)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists `(id, phone)` for every user with a phone
    pub async fn list_phones(pool: &PgPool) -> Result<Vec<(Uuid, String)>, sqlx::Error> {
        sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, phone FROM users WHERE phone IS NOT NULL ORDER BY created_at",
        )
        .fetch_all(pool)
        .await
    }

    /// Admin listing with optional search and blocked filter, newest first
    pub async fn search(pool: &PgPool, filter: UserFilter) -> Result<Vec<Self>, sqlx::Error> {
        let pattern = filter.search.map(|s| format!("%{}%", s));

        sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, email, name, password_hash, role, is_blocked,
                   created_at, updated_at
            FROM users
            WHERE ($1::TEXT IS NULL
                   OR phone ILIKE $1
                   OR email::TEXT ILIKE $1
                   OR name ILIKE $1)
              AND ($2::BOOLEAN IS NULL OR is_blocked = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(pattern)
        .bind(filter.blocked)
        .bind(filter.limit)
        .fetch_all(pool)
        .await
    }

    /// Counts users, blocked users and admins
    pub async fn counts(pool: &PgPool) -> Result<UserCounts, sqlx::Error> {
        sqlx::query_as::<_, UserCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE is_blocked) AS blocked,
                   COUNT(*) FILTER (WHERE role = 'admin') AS admins
            FROM users
            "#,
        )
        .fetch_one(pool)
        .await
    }
}
