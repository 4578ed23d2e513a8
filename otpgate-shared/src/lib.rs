//! # otpgate shared library
//!
//! Domain types and business logic used by the otpgate API server.
//!
//! ## Module Organization
//!
//! - `auth`: passwords, session tokens, opaque credentials, middleware, authorization
//! - `credits`: credit ledger service and trial gating
//! - `db`: connection pool and embedded migrations
//! - `login_links`: WhatsApp / SMS deep links for QR login
//! - `models`: database models and their queries
//! - `phone`: phone number normalization

pub mod auth;
pub mod credits;
pub mod db;
pub mod login_links;
pub mod models;
pub mod phone;

/// Current version of the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
