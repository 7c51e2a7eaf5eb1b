//! Shape checks for `POST /api/keys` bodies. Runs before any store call.

use crate::credentials::CredentialSubmission;
use serde_json::{Map, Value};
use thiserror::Error;

/// Required fields, in the order they are reported when missing.
pub const REQUIRED_FIELDS: [&str; 3] = ["exchange", "api_key", "api_secret"];

pub const MAX_EXCHANGE_CHARS: usize = 50;
pub const MAX_SECRET_CHARS: usize = 255;

/// Messages are safe to return to clients: they name fields, never values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid JSON payload")]
    MalformedPayload,

    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("All fields must be non-empty strings")]
    EmptyField,

    #[error("Field '{field}' exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Parse and validate a raw request body.
pub fn validate_submission(body: &[u8]) -> Result<CredentialSubmission, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ValidationError::MalformedPayload)?;
    let Value::Object(fields) = value else {
        return Err(ValidationError::NotAnObject);
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|name| !fields.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    let exchange = non_empty_string(&fields, "exchange")?;
    let api_key = non_empty_string(&fields, "api_key")?;
    let api_secret = non_empty_string(&fields, "api_secret")?;

    check_length("exchange", exchange, MAX_EXCHANGE_CHARS)?;
    check_length("api_key", api_key, MAX_SECRET_CHARS)?;
    check_length("api_secret", api_secret, MAX_SECRET_CHARS)?;

    Ok(CredentialSubmission::new(exchange, api_key, api_secret))
}

/// The field's value as submitted, provided it is a string with
/// non-whitespace content.
fn non_empty_string<'a>(
    fields: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ValidationError> {
    match fields.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        _ => Err(ValidationError::EmptyField),
    }
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
