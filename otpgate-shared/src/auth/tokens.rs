/// Random credentials: organization tokens, login hashes and OTP codes
///
/// # Formats
///
/// - **Organization token**: `otpg_` + 40 base62 chars (45 total). Only the
///   SHA-256 hex digest is stored; the plaintext is shown once on creation.
/// - **Login hash**: 32 random bytes, hex encoded (64 chars). Stored as-is,
///   since it is short-lived and already public in the QR payload.
/// - **OTP code**: 6 decimal digits, stored as a SHA-256 digest.
///
/// # Example
///
/// ```
/// use otpgate_shared::auth::tokens::{generate_org_token, hash_secret, validate_org_token_format};
///
/// let (token, hash) = generate_org_token();
/// assert!(token.starts_with("otpg_"));
/// assert!(validate_org_token_format(&token));
/// assert_eq!(hash, hash_secret(&token));
/// ```

use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// Length of the random part of an organization token
const ORG_TOKEN_RANDOM_LENGTH: usize = 40;

/// Organization token prefix
pub const ORG_TOKEN_PREFIX: &str = "otpg_";

/// Total organization token length (prefix + random)
pub const ORG_TOKEN_LENGTH: usize = ORG_TOKEN_PREFIX.len() + ORG_TOKEN_RANDOM_LENGTH;

/// Number of random bytes in a login hash
pub const LOGIN_HASH_BYTES: usize = 32;

/// Number of digits in an OTP code
pub const OTP_CODE_DIGITS: usize = 6;

/// Characters of a token kept for display
const DISPLAY_PREFIX_LENGTH: usize = 12;

/// Generates a new organization token
///
/// Returns `(plaintext, sha256_hex)`.
pub fn generate_org_token() -> (String, String) {
    let token = format!(
        "{}{}",
        ORG_TOKEN_PREFIX,
        generate_random_string(ORG_TOKEN_RANDOM_LENGTH)
    );
    let hash = hash_secret(&token);

    (token, hash)
}

/// Base62 random string
fn generate_random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generates a login hash: 32 random bytes as lowercase hex
///
/// ```
/// use otpgate_shared::auth::tokens::generate_login_hash;
///
/// let hash = generate_login_hash();
/// assert_eq!(hash.len(), 64);
/// ```
pub fn generate_login_hash() -> String {
    let mut bytes = [0u8; LOGIN_HASH_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Checks that a string looks like a login hash (64 lowercase hex chars)
pub fn validate_login_hash_format(hash: &str) -> bool {
    hash.len() == LOGIN_HASH_BYTES * 2
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Generates a zero-padded 6 digit OTP code
pub fn generate_otp_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_CODE_DIGITS)
}

/// SHA-256 hex digest of a secret (org token or OTP code)
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First characters of a token, for listing tokens without exposing them
pub fn display_prefix(token: &str) -> String {
    token.chars().take(DISPLAY_PREFIX_LENGTH).collect()
}

/// Validates organization token format (prefix, length, base62 body)
pub fn validate_org_token_format(token: &str) -> bool {
    if token.len() != ORG_TOKEN_LENGTH {
        return false;
    }

    match token.strip_prefix(ORG_TOKEN_PREFIX) {
        Some(random_part) => random_part.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

/// Verifies a plaintext secret against a stored SHA-256 digest
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    constant_time_compare(&hash_secret(secret), stored_hash)
}

/// Constant-time string comparison
///
/// Used for the bot webhook shared secret and hashed OTP codes. Length is not
/// secret; a length mismatch returns early.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
