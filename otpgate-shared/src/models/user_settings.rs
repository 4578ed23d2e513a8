/// Per-user preferences
///
/// The row is created lazily; reads fall back to defaults when it is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSettings {
    pub user_id: Uuid,
    pub language: String,
    pub notifications_enabled: bool,
    pub whatsapp_notifications: bool,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the stored (or default) value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub language: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub whatsapp_notifications: Option<bool>,
}

impl UserSettings {
    /// Defaults for a user with no stored row
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            language: DEFAULT_LANGUAGE.to_string(),
            notifications_enabled: true,
            whatsapp_notifications: true,
            updated_at: Utc::now(),
        }
    }

    /// Stored settings or defaults
    pub async fn get_or_default(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        let stored = sqlx::query_as::<_, UserSettings>(
            r#"
            SELECT user_id, language, notifications_enabled, whatsapp_notifications, updated_at
            FROM user_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(stored.unwrap_or_else(|| Self::defaults(user_id)))
    }

    /// Inserts or merges settings
    pub async fn upsert(
        pool: &PgPool,
        user_id: Uuid,
        data: UpdateSettings,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, UserSettings>(
            r#"
            INSERT INTO user_settings (user_id, language, notifications_enabled, whatsapp_notifications)
            VALUES ($1, COALESCE($2, 'en'), COALESCE($3, TRUE), COALESCE($4, TRUE))
            ON CONFLICT (user_id) DO UPDATE SET
                language = COALESCE($2, user_settings.language),
                notifications_enabled = COALESCE($3, user_settings.notifications_enabled),
                whatsapp_notifications = COALESCE($4, user_settings.whatsapp_notifications),
                updated_at = NOW()
            RETURNING user_id, language, notifications_enabled, whatsapp_notifications, updated_at
            "#,
        )
        .bind(user_id)
        .bind(data.language)
        .bind(data.notifications_enabled)
        .bind(data.whatsapp_notifications)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let id = Uuid::new_v4();
        let settings = UserSettings::defaults(id);
        assert_eq!(settings.user_id, id);
        assert_eq!(settings.language, "en");
        assert!(settings.notifications_enabled);
        assert!(settings.whatsapp_notifications);
    }
}
