/// Session token signing and validation
///
/// Every issued token is bound to a row in the `sessions` table through the
/// `sid` claim. A token whose signature is valid but whose session row is gone
/// (logout) or expired is rejected by the API middleware.
///
/// # Security
///
/// - **Algorithm**: HS256
/// - **Issuer**: `otpgate`
/// - **Validation**: signature, `exp`, `nbf`, issuer
/// - **Secret**: at least 32 bytes, enforced by the API config loader
///
/// # Example
///
/// ```
/// use otpgate_shared::auth::jwt::{create_token, validate_token, Claims};
/// use otpgate_shared::models::session::AuthMethod;
/// use otpgate_shared::models::user::UserRole;
/// use chrono::Duration;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let claims = Claims::new(
///     Uuid::new_v4(),
///     Uuid::new_v4(),
///     UserRole::User,
///     AuthMethod::Qr,
///     Duration::days(30),
/// );
/// let token = create_token(&claims, "a-secret-that-is-at-least-32-bytes")?;
/// let validated = validate_token(&token, "a-secret-that-is-at-least-32-bytes")?;
/// assert_eq!(validated.sid, claims.sid);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::AuthMethod;
use crate::models::user::UserRole;

/// Issuer written into and required from every token
pub const ISSUER: &str = "otpgate";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Failed to validate token
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Invalid issuer
    #[error("Invalid issuer: expected {expected}")]
    InvalidIssuer { expected: String },
}

/// JWT claims
///
/// - `sub`: user id
/// - `sid`: session row id
/// - `role`: role at issuance time (the middleware re-reads the user row, so
///   role changes take effect without reissuing)
/// - `auth_method`: how the session was obtained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user ID
    pub sub: Uuid,

    /// Session ID
    pub sid: Uuid,

    /// Issuer - always "otpgate"
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Role of the user when the token was issued
    pub role: UserRole,

    /// How the session was obtained
    pub auth_method: AuthMethod,
}

impl Claims {
    /// Creates claims expiring `ttl` from now
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        role: UserRole,
        auth_method: AuthMethod,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let expiration = now + ttl;

        Self {
            sub: user_id,
            sid: session_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            nbf: now.timestamp(),
            role,
            auth_method,
        }
    }

    /// Expiration as a timestamp, matching the session row's `expires_at`
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Checks if token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Signs claims with HS256
///
/// # Errors
///
/// Returns `JwtError::CreateError` if encoding fails
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Validates a token and extracts its claims
///
/// # Errors
///
/// - `JwtError::Expired` when `exp` has passed
/// - `JwtError::InvalidIssuer` when the issuer is not `otpgate`
/// - `JwtError::ValidationError` for bad signatures or malformed tokens
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer {
            expected: ISSUER.to_string(),
        },
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}
