//! Input validation for phone numbers, codes and deep-link payloads
//!
//! Provides security-focused validation for user inputs:
//! - Full international phone numbers (`+` followed by 8-18 digits)
//! - Split web-form input (country code + local number)
//! - Normalization of channel-asserted numbers to the same format
//! - One-time code format
//! - `/start` payload parsing (`VERIFY_<attempt id>`)

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::core::config;

static FULL_PHONE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\d{8,18}$").expect("valid regex"));
static COUNTRY_CODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\d{1,4}$").expect("valid regex"));
static LOCAL_NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7,14}$").expect("valid regex"));
static CODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").expect("valid regex"));
static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{1,56}$").expect("valid regex"));

/// Validation errors, attributed to the offending input field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the input field as the web form knows it
    pub field: &'static str,
    /// Human-readable explanation
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validates a full international phone number.
///
/// Accepts exactly what the web form produces: a leading `+` and 8 to 18
/// digits, no spaces or separators.
///
/// # Examples
/// ```
/// use televerify::core::validation::validate_phone_number;
///
/// assert!(validate_phone_number("+14155550000").is_ok());
/// assert!(validate_phone_number("14155550000").is_err());
/// assert!(validate_phone_number("+1 415 555 0000").is_err());
/// ```
pub fn validate_phone_number(phone: &str) -> Result<(), ValidationError> {
    if phone.len() < 9 {
        return Err(ValidationError::new(
            "phoneNumber",
            "Full phone number is too short (country code + local number).",
        ));
    }
    if phone.len() > 19 {
        return Err(ValidationError::new("phoneNumber", "Full phone number is too long."));
    }
    if !FULL_PHONE_REGEX.is_match(phone) {
        return Err(ValidationError::new(
            "phoneNumber",
            "Invalid full phone number format (e.g., +11234567890).",
        ));
    }
    Ok(())
}

/// Validates the split web-form input and joins it into a full number.
pub fn compose_phone_number(country_code: &str, local_number: &str) -> Result<String, ValidationError> {
    let country_code = country_code.trim();
    let local_number = local_number.trim();

    if country_code.is_empty() {
        return Err(ValidationError::new("countryCode", "Please select a country code."));
    }
    if !COUNTRY_CODE_REGEX.is_match(country_code) {
        return Err(ValidationError::new(
            "countryCode",
            "Invalid country code format (e.g., +1).",
        ));
    }
    if local_number.is_empty() {
        return Err(ValidationError::new("localPhoneNumber", "Please enter a phone number."));
    }
    if !local_number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            "localPhoneNumber",
            "Local phone number must contain only digits.",
        ));
    }
    if !LOCAL_NUMBER_REGEX.is_match(local_number) {
        return Err(ValidationError::new(
            "localPhoneNumber",
            "Local phone number must be 7 to 14 digits.",
        ));
    }

    let full = format!("{}{}", country_code, local_number);
    validate_phone_number(&full).map_err(|e| ValidationError::new("localPhoneNumber", e.message))?;
    Ok(full)
}

/// Normalizes a channel-asserted phone number to the submitted format.
///
/// Telegram reports contact numbers with or without the leading `+`
/// depending on the client. Whitespace is dropped and a `+` is added when
/// missing; nothing else is rewritten, so comparison stays exact.
///
/// # Examples
/// ```
/// use televerify::core::validation::normalize_asserted_phone;
///
/// assert_eq!(normalize_asserted_phone("251911223344"), "+251911223344");
/// assert_eq!(normalize_asserted_phone("+251911223344"), "+251911223344");
/// ```
pub fn normalize_asserted_phone(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('+') {
        compact
    } else {
        format!("+{}", compact)
    }
}

/// Checks that a submitted code is six decimal digits.
pub fn validate_code_format(code: &str) -> Result<(), ValidationError> {
    if CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "code",
            "Verification code must be numeric and 6 digits.",
        ))
    }
}

/// Extracts the attempt token from a `/start` payload.
///
/// Returns `None` for anything that is not `VERIFY_<token>` with a token of
/// letters, digits and hyphens. Telegram limits the payload to 64 characters,
/// which bounds the token.
pub fn parse_deep_link_payload(payload: &str) -> Option<&str> {
    let token = payload.trim().strip_prefix(config::verification::DEEP_LINK_PREFIX)?;
    TOKEN_REGEX.is_match(token).then_some(token)
}

/// Builds the `/start` payload for an attempt id.
pub fn deep_link_payload(attempt_id: &str) -> String {
    format!("{}{}", config::verification::DEEP_LINK_PREFIX, attempt_id)
}
