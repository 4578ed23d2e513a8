/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Password accounts and sessions (register, login, logout, me)
/// - `qr_login`: QR / WhatsApp login requests and the bot webhook
/// - `credits`: Personal credit ledger
/// - `otp`: One-time codes sent through the bot
/// - `payments`: Credit purchases
/// - `organizations`: Organizations, members, groups, tokens
/// - `org_api`: Endpoints called with an organization token
/// - `support`: Support tickets and the public contact form
/// - `account`: Settings and profile
/// - `admin`: Admin console

pub mod account;
pub mod admin;
pub mod auth;
pub mod credits;
pub mod health;
pub mod org_api;
pub mod organizations;
pub mod otp;
pub mod payments;
pub mod qr_login;
pub mod support;

use serde::Deserialize;

/// `?limit=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// Applies a default and clamps to `1..=max`
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 50, 200), 50);
        assert_eq!(clamp_limit(Some(500), 50, 200), 200);
        assert_eq!(clamp_limit(Some(0), 50, 200), 1);
        assert_eq!(clamp_limit(Some(-3), 50, 200), 1);
        assert_eq!(clamp_limit(Some(20), 50, 200), 20);
    }
}
