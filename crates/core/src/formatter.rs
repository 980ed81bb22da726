use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,6}$")
        .expect("email pattern is a valid regex")
});

/// Errors raised when a contact field does not have an acceptable shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid email format")]
    InvalidEmail,
    #[error("invalid phone number; it must contain 10 or 11 digits")]
    InvalidPhone,
}

impl FormatError {
    /// Name of the request field the error refers to.
    pub fn field(self) -> &'static str {
        match self {
            Self::InvalidEmail => "email",
            Self::InvalidPhone => "phone",
        }
    }
}

/// Trims, lower-cases and validates an email address.
///
/// Only code points up to ASCII space are trimmed, so other Unicode
/// whitespace stays and fails validation. An absent email is passed through
/// without validation.
pub fn format_email(raw: Option<&str>) -> Result<Option<String>, FormatError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let normalized = raw.trim_matches(|c: char| c <= ' ').to_lowercase();
    if EMAIL_PATTERN.is_match(&normalized) {
        Ok(Some(normalized))
    } else {
        Err(FormatError::InvalidEmail)
    }
}

/// Formats a raw digit string as `(DD) DDDD-DDDD` (10 digits) or
/// `(DD) DDDDD-DDDD` (11 digits).
///
/// Unlike email, a missing phone is rejected. The input is not trimmed, so
/// any non-digit character makes it invalid.
pub fn format_phone(raw: Option<&str>) -> Result<String, FormatError> {
    let digits = raw.ok_or(FormatError::InvalidPhone)?;
    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(FormatError::InvalidPhone);
    }

    let split = match digits.len() {
        10 => 6,
        11 => 7,
        _ => return Err(FormatError::InvalidPhone),
    };

    Ok(format!(
        "({}) {}-{}",
        &digits[..2],
        &digits[2..split],
        &digits[split..]
    ))
}
