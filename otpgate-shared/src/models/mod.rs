/// Database models for otpgate
///
/// Each model owns its SQL. Functions that must run inside a caller's
/// transaction take `&mut PgConnection` or any `PgExecutor`; the rest take
/// the pool.
///
/// # Models
///
/// - `user`: accounts keyed by normalized phone and/or email
/// - `session`: one row per issued bearer token
/// - `login_request`: QR / WhatsApp verification requests
/// - `otp_request`: one-time codes sent through the bot
/// - `credit`: personal and organization credit ledgers
/// - `payment`: payment transactions
/// - `organization`: organizations and memberships
/// - `org_group`: named groups of members
/// - `org_api_token`: hashed organization API tokens
/// - `org_usage`: once-per-request organization usage
/// - `support_ticket`, `contact_message`, `user_settings`
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::models::user::{CreateUser, User, UserRole};
/// use otpgate_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     phone: Some("+14155550100".to_string()),
///     email: None,
///     name: None,
///     password_hash: None,
///     role: UserRole::User,
/// }).await?;
/// # Ok(())
/// # }
/// ```

pub mod contact_message;
pub mod credit;
pub mod login_request;
pub mod org_api_token;
pub mod org_group;
pub mod org_usage;
pub mod organization;
pub mod otp_request;
pub mod payment;
pub mod session;
pub mod support_ticket;
pub mod user;
pub mod user_settings;
