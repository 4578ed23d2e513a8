/// Phone number normalization
///
/// Phones are stored as `+<country code><subscriber number>` with 8 to 15
/// digits, so the same handset always maps to the same user row no matter how
/// the number was typed or how the bot relays it.
///
/// # Rules
///
/// 1. Spaces, dashes, dots and parentheses are dropped.
/// 2. A `00` international prefix becomes `+`.
/// 3. A single leading trunk `0` is replaced by the default country code.
/// 4. Bare digits are taken to already include the country code.
///
/// ```
/// use otpgate_shared::phone::normalize_phone;
///
/// assert_eq!(normalize_phone("+1 (415) 555-0100", "1").unwrap(), "+14155550100");
/// assert_eq!(normalize_phone("0044 20 7946 0958", "1").unwrap(), "+442079460958");
/// assert_eq!(normalize_phone("050-123-4567", "972").unwrap(), "+972501234567");
/// ```

use serde::Serialize;
use std::collections::HashSet;

/// Minimum digits in a normalized number (country code included)
pub const MIN_DIGITS: usize = 8;

/// Maximum digits allowed by E.164
pub const MAX_DIGITS: usize = 15;

/// Phone normalization failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number contains invalid characters")]
    InvalidCharacters,

    #[error("Phone number must have between {MIN_DIGITS} and {MAX_DIGITS} digits, got {0}")]
    InvalidLength(usize),

    #[error("Invalid default country code: {0}")]
    InvalidCountryCode(String),
}

/// Normalizes a user-supplied phone number
///
/// # Errors
///
/// Returns `PhoneError` when the input is empty, contains characters other
/// than digits and separators, or has an implausible digit count.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '\u{a0}'))
        .collect();

    if compact.is_empty() {
        return Err(PhoneError::Empty);
    }

    let digits = if let Some(rest) = compact.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix('0') {
        let cc = default_country_code.trim_start_matches('+');
        if cc.is_empty() || cc.len() > 3 || !cc.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhoneError::InvalidCountryCode(default_country_code.to_string()));
        }
        format!("{}{}", cc, rest)
    } else {
        compact
    };

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::InvalidCharacters);
    }

    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return Err(PhoneError::InvalidLength(digits.len()));
    }

    Ok(format!("+{}", digits))
}

/// Digits of a normalized phone without the leading `+` (wa.me format)
pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether a stored phone is already in normalized form
pub fn is_normalized(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => {
            (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Outcome of planning a bulk rewrite of stored phones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationPlan<K> {
    /// `(key, normalized)` rows to rewrite
    #[serde(skip)]
    pub updates: Vec<(K, String)>,

    pub scanned: usize,

    /// Rows whose normalized form already belongs to another row
    pub skipped_conflicts: usize,

    /// Rows that cannot be normalized at all
    pub invalid: usize,
}

/// Plans the rewrite of stored phones into normalized form
///
/// Rows already normalized are left alone. A row is skipped when its
/// normalized phone is held by another row, either as stored or because an
/// earlier row in `rows` was planned onto it.
pub fn plan_normalization<K: Clone>(
    rows: &[(K, String)],
    default_country_code: &str,
) -> NormalizationPlan<K> {
    let mut taken: HashSet<&str> = rows.iter().map(|(_, phone)| phone.as_str()).collect();
    let mut planned: HashSet<String> = HashSet::new();
    let mut plan = NormalizationPlan {
        updates: Vec::new(),
        scanned: rows.len(),
        skipped_conflicts: 0,
        invalid: 0,
    };

    for (key, stored) in rows {
        let normalized = match normalize_phone(stored, default_country_code) {
            Ok(n) => n,
            Err(_) => {
                plan.invalid += 1;
                continue;
            }
        };

        if &normalized == stored {
            continue;
        }

        if taken.contains(normalized.as_str()) || planned.contains(&normalized) {
            plan.skipped_conflicts += 1;
            continue;
        }

        taken.remove(stored.as_str());
        planned.insert(normalized.clone());
        plan.updates.push((key.clone(), normalized));
    }

    plan
}
