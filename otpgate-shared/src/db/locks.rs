/// Transaction-scoped advisory locks
///
/// Per-phone limits are checked with `COUNT(*)` and then enforced by an
/// `INSERT`. Two requests for the same phone must not both see the old
/// count, so both steps run in one transaction after taking
/// `pg_advisory_xact_lock(scope, hashtext(phone))`. The lock is released on
/// commit or rollback.

use sqlx::PgConnection;

/// Key space of a phone lock; the two limits never contend with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneLockScope {
    /// Pending QR login requests
    LoginRequest,

    /// OTP sends
    OtpSend,
}

impl PhoneLockScope {
    /// First key of the two-key advisory lock
    pub fn key(&self) -> i32 {
        match self {
            PhoneLockScope::LoginRequest => 0x4f54_5001,
            PhoneLockScope::OtpSend => 0x4f54_5002,
        }
    }
}

/// Blocks until this transaction holds the lock for `phone` in `scope`
pub async fn lock_phone(
    conn: &mut PgConnection,
    scope: PhoneLockScope,
    phone: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
        .bind(scope.key())
        .bind(phone)
        .execute(conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_use_distinct_keys() {
        assert_ne!(
            PhoneLockScope::LoginRequest.key(),
            PhoneLockScope::OtpSend.key()
        );
    }
}
