use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid format for field '{field}': {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Invalid length for field '{field}': expected {min}-{max} characters, got {actual}")]
    InvalidLength {
        field: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Value out of range for field '{field}': {value}")]
    ValueOutOfRange { field: String, value: String },

    #[error("Required field '{field}' is missing")]
    RequiredField { field: String },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap();
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
    static ref CURRENCY_REGEX: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
}

/// Trims and checks that a required text field fits in `min..=max` characters.
pub fn validate_text(field: &str, value: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() && min > 0 {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }

    let actual = trimmed.chars().count();
    if actual < min || actual > max {
        return Err(ValidationError::InvalidLength {
            field: field.to_string(),
            min,
            max,
            actual,
        });
    }

    Ok(())
}

pub fn validate_optional_text(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => validate_text(field, v, 0, max),
        None => Ok(()),
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    validate_text("email", email, 3, 254)?;
    if !EMAIL_REGEX.is_match(email.trim()) {
        return Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: "not a valid email address".to_string(),
        });
    }
    Ok(())
}

/// Passwords need at least ten characters, one letter and one digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if !(10..=128).contains(&len) {
        return Err(ValidationError::InvalidLength {
            field: "password".to_string(),
            min: 10,
            max: 128,
            actual: len,
        });
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ValidationError::InvalidFormat {
            field: "password".to_string(),
            reason: "must contain at least one letter and one digit".to_string(),
        });
    }

    Ok(())
}

/// Lowercases and collapses everything outside `[a-z0-9]` into single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug.truncate(80);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    validate_text("slug", slug, 1, 80)?;
    if !SLUG_REGEX.is_match(slug) {
        return Err(ValidationError::InvalidFormat {
            field: "slug".to_string(),
            reason: "only lowercase letters, digits and single dashes are allowed".to_string(),
        });
    }
    Ok(())
}

pub fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if !CURRENCY_REGEX.is_match(currency) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "expected a three letter ISO 4217 code".to_string(),
        });
    }
    Ok(())
}

pub fn validate_non_negative(field: &str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::ValueOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn validate_date_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<(), ValidationError> {
    if let Some(end) = end {
        if end < start {
            return Err(ValidationError::ValueOutOfRange {
                field: "end_date".to_string(),
                value: format!("{} is before start_date {}", end, start),
            });
        }
    }
    Ok(())
}
