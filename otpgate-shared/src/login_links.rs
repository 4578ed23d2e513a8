/// Deep links carried by the login QR code
///
/// The user scans the QR (or taps the link on mobile) and their messaging
/// app opens with `VERIFY <hash>` prefilled, addressed to the bot.
///
/// ```
/// use otpgate_shared::login_links::LoginLinks;
///
/// let links = LoginLinks::build("+1 555 000 0000", "+15550000001", "abc123");
/// assert_eq!(links.whatsapp_link, "https://wa.me/15550000000?text=VERIFY%20abc123");
/// assert_eq!(links.sms_link, "sms:+15550000001?body=VERIFY%20abc123");
/// assert_eq!(links.qr_code_data, links.whatsapp_link);
/// ```

use serde::Serialize;

use crate::phone::digits_only;

/// Command word the bot recognises
pub const VERIFY_COMMAND: &str = "VERIFY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginLinks {
    /// `https://wa.me/<digits>?text=VERIFY%20<hash>`
    pub whatsapp_link: String,

    /// `sms:<number>?body=VERIFY%20<hash>`
    pub sms_link: String,

    /// Payload encoded in the QR image
    pub qr_code_data: String,
}

impl LoginLinks {
    pub fn build(whatsapp_number: &str, sms_number: &str, hash_code: &str) -> Self {
        let text = urlencoding::encode(&verify_text(hash_code)).into_owned();

        let whatsapp_link = format!("https://wa.me/{}?text={}", digits_only(whatsapp_number), text);
        let sms_number: String = sms_number.chars().filter(|c| !c.is_whitespace()).collect();
        let sms_link = format!("sms:{}?body={}", sms_number, text);

        Self {
            qr_code_data: whatsapp_link.clone(),
            whatsapp_link,
            sms_link,
        }
    }
}

/// Message the user sends to the bot
pub fn verify_text(hash_code: &str) -> String {
    format!("{} {}", VERIFY_COMMAND, hash_code)
}

/// Extracts the hash from a raw `VERIFY <hash>` message
///
/// The command word is case-insensitive and surrounding whitespace is
/// ignored. Returns `None` for anything else.
pub fn parse_verify_text(text: &str) -> Option<&str> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    let hash = parts.next()?;

    if parts.next().is_some() || !command.eq_ignore_ascii_case(VERIFY_COMMAND) {
        return None;
    }

    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_are_url_encoded() {
        let hash = "0f".repeat(32);
        let links = LoginLinks::build("+972501234567", "+972501234568", &hash);

        assert!(links.whatsapp_link.starts_with("https://wa.me/972501234567?text=VERIFY%20"));
        assert!(links.whatsapp_link.ends_with(&hash));
        assert!(!links.whatsapp_link.contains(' '));
        assert!(links.sms_link.starts_with("sms:+972501234568?body=VERIFY%20"));
    }

    #[test]
    fn test_parse_verify_text() {
        assert_eq!(parse_verify_text("VERIFY abc"), Some("abc"));
        assert_eq!(parse_verify_text("  verify   abc \n"), Some("abc"));
        assert_eq!(parse_verify_text("VERIFY"), None);
        assert_eq!(parse_verify_text("HELLO abc"), None);
        assert_eq!(parse_verify_text("VERIFY abc extra"), None);
        assert_eq!(parse_verify_text(""), None);
    }

    #[test]
    fn test_verify_text_roundtrip() {
        let hash = "deadbeef";
        assert_eq!(parse_verify_text(&verify_text(hash)), Some(hash));
    }
}
