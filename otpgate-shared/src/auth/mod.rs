/// Authentication and authorization primitives
///
/// # Modules
///
/// - [`password`]: Argon2id hashing for password accounts
/// - [`jwt`]: session token signing and validation
/// - [`tokens`]: organization tokens, login hashes, OTP codes
/// - [`middleware`]: Axum bearer middleware (sessions and organization tokens)
/// - [`authorization`]: admin and organization role checks
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::auth::password::{hash_password, verify_password};
/// use otpgate_shared::auth::tokens::generate_login_hash;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("hunter22x")?;
/// assert!(verify_password("hunter22x", &hash)?);
///
/// let login_hash = generate_login_hash();
/// assert_eq!(login_hash.len(), 64);
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod tokens;
