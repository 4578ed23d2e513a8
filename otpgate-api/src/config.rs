/// Configuration management for the API server
///
/// Configuration is read from environment variables (a `.env` file is loaded
/// first when present).
///
/// # Environment Variables
///
/// | variable | default |
/// |---|---|
/// | `API_HOST` / `API_PORT` | `0.0.0.0` / `8080` |
/// | `CORS_ORIGINS` (comma separated) | `*` |
/// | `APP_ENV` (`production` enables HSTS) | `development` |
/// | `DATABASE_URL` | required |
/// | `DATABASE_MAX_CONNECTIONS` | `10` |
/// | `JWT_SECRET` (≥ 32 chars) | required |
/// | `SESSION_TTL_DAYS` | `30` |
/// | `BOT_SERVICE_URL` | `http://localhost:3001` |
/// | `BOT_SHARED_SECRET` | required |
/// | `BOT_WHATSAPP_NUMBER` | required |
/// | `BOT_SMS_NUMBER` | `BOT_WHATSAPP_NUMBER` |
/// | `BOT_TIMEOUT_SECONDS` | `10` |
/// | `WELCOME_CREDITS` / `INACTIVITY_DAYS` | `10` / `90` |
/// | `LOGIN_REQUEST_TTL_SECONDS` | `300` |
/// | `MAX_PENDING_LOGIN_REQUESTS` | `5` |
/// | `DEFAULT_COUNTRY_CODE` | `1` |
/// | `ADMIN_SEED_PHONES` (comma separated) | empty |
///
/// # Example
///
/// ```no_run
/// use otpgate_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use otpgate_shared::credits::TrialPolicy;
use otpgate_shared::phone::normalize_phone;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Minimum accepted JWT secret length
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub bot: BotConfig,
    pub credits: CreditsConfig,
    pub login: LoginConfig,
    pub phone: PhoneConfig,
    pub admin: AdminConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed origins; `*` means permissive
    pub cors_origins: Vec<String>,

    /// Enables production-only hardening (HSTS)
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 signing key, at least 32 characters
    #[serde(skip_serializing)]
    pub secret: String,

    /// Session (and token) lifetime
    pub session_ttl_days: i64,
}

/// Messaging bot service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Base URL of the bot HTTP service
    pub service_url: String,

    /// Shared secret in `X-Internal-Secret`, both directions
    #[serde(skip_serializing)]
    pub shared_secret: String,

    /// WhatsApp number users message to verify
    pub whatsapp_number: String,

    /// SMS number users message to verify
    pub sms_number: String,

    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsConfig {
    pub welcome_credits: i32,
    pub inactivity_days: i64,
}

/// QR login request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    pub request_ttl_seconds: i64,

    /// Unexpired, unverified requests allowed per phone
    pub max_pending_per_phone: i64,

    /// Hint returned to polling clients
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// Country code applied to numbers with a trunk `0`
    pub default_country_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Normalized phones that become admins when their account is created
    pub seed_phones: Vec<String>,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = required(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
            anyhow::bail!(
                "JWT_SECRET must be at least {} characters long",
                MIN_JWT_SECRET_LENGTH
            );
        }

        let default_country_code = lookup("DEFAULT_COUNTRY_CODE")
            .unwrap_or_else(|| "1".to_string())
            .trim()
            .trim_start_matches('+')
            .to_string();
        if default_country_code.is_empty()
            || default_country_code.len() > 3
            || !default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            anyhow::bail!("DEFAULT_COUNTRY_CODE must be 1-3 digits");
        }

        let whatsapp_number = required(&lookup, "BOT_WHATSAPP_NUMBER")?;
        let sms_number = lookup("BOT_SMS_NUMBER").unwrap_or_else(|| whatsapp_number.clone());

        let seed_phones = split_list(&lookup("ADMIN_SEED_PHONES").unwrap_or_default())
            .iter()
            .map(|raw| {
                normalize_phone(raw, &default_country_code)
                    .with_context(|| format!("Invalid phone in ADMIN_SEED_PHONES: {:?}", raw))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let production = lookup("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let welcome_credits: i32 = parse_or(&lookup, "WELCOME_CREDITS", 10)?;
        if welcome_credits < 0 {
            anyhow::bail!("WELCOME_CREDITS must not be negative");
        }

        Ok(Self {
            api: ApiConfig {
                host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "API_PORT", 8080)?,
                cors_origins: {
                    let origins = split_list(&lookup("CORS_ORIGINS").unwrap_or_default());
                    if origins.is_empty() {
                        vec!["*".to_string()]
                    } else {
                        origins
                    }
                },
                production,
            },
            database: DatabaseConfig {
                url: required(&lookup, "DATABASE_URL")?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                session_ttl_days: parse_or(&lookup, "SESSION_TTL_DAYS", 30)?,
            },
            bot: BotConfig {
                service_url: lookup("BOT_SERVICE_URL")
                    .unwrap_or_else(|| "http://localhost:3001".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                shared_secret: required(&lookup, "BOT_SHARED_SECRET")?,
                whatsapp_number,
                sms_number,
                timeout_seconds: parse_or(&lookup, "BOT_TIMEOUT_SECONDS", 10)?,
            },
            credits: CreditsConfig {
                welcome_credits,
                inactivity_days: parse_or(&lookup, "INACTIVITY_DAYS", 90)?,
            },
            login: LoginConfig {
                request_ttl_seconds: parse_or(&lookup, "LOGIN_REQUEST_TTL_SECONDS", 300)?,
                max_pending_per_phone: parse_or(&lookup, "MAX_PENDING_LOGIN_REQUESTS", 5)?,
                poll_interval_seconds: 2,
            },
            phone: PhoneConfig {
                default_country_code,
            },
            admin: AdminConfig { seed_phones },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Session lifetime
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.jwt.session_ttl_days)
    }

    /// Trial parameters for the credit ledger
    pub fn trial_policy(&self) -> TrialPolicy {
        TrialPolicy {
            welcome_credits: self.credits.welcome_credits,
            inactivity_days: self.credits.inactivity_days,
        }
    }

    /// Whether a normalized phone is seeded as admin
    pub fn is_seed_admin(&self, phone: &str) -> bool {
        self.admin.seed_phones.iter().any(|p| p == phone)
    }
}
